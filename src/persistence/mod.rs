pub mod writer;

pub use writer::{PersistenceWriter, RetryPolicy, WriteMetrics, WriterError, WriterStats};
