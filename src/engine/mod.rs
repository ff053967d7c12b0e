pub mod receiving;
pub mod sending;

pub use receiving::{ReceiverSummary, ReceivingSocket};
pub use sending::{SendFailure, SendReport, SenderSummary, SendingSocket};
