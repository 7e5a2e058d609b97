pub mod accounts;

pub use accounts::HttpAccountClient;
