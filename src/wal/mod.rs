pub mod manager;
pub mod reader;
pub mod record;
pub mod writer;

pub use manager::{list_segments, segment_name, WalManager};
pub use reader::{replay, Replay, WalReader};
pub use record::LogEntry;
pub use writer::WalWriter;
