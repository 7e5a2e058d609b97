pub mod transfers;

pub use transfers::{Paginated, TransferService};
