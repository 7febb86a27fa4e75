//! Events sent to the report thread.

use crate::report::FindingRecord;

#[derive(Debug)]
pub enum ReportEvent {
    /// A finding ready for the sink.
    Finding(FindingRecord),
    /// Flush buffered findings to disk.
    Flush,
}
