pub mod file;
pub mod rate;

pub fn generate_random(size: usize) -> Vec<u8> {
    use rand::Rng;
    let mut data: Vec<u8> = vec![0; size];
    rand::rng().fill(data.as_mut_slice());
    data
}

/// Short content fingerprint for log lines; enough to match a frame sent on
/// one end with the frame shown on the other.
pub fn frame_digest(data: &[u8]) -> String {
    hex::encode(&blake3::hash(data).as_bytes()[..8])
}
