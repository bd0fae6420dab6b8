use crate::api::{
    AbortTransactionResult, CommitTransactionResult, ExecuteStatementResult, FetchPageResult,
    StartTransactionResult,
};

// Public (stable) types for execution stats.
//
// The service reports timing and IO usage on most responses. The driver sums
// them per statement (across fetched pages) and per transaction attempt.

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimingInformation {
    pub processing_time_milliseconds: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IoUsage {
    pub read_ios: i64,
    pub write_ios: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecutionStats {
    pub timing_information: TimingInformation,
    pub io_usage: IoUsage,
}

impl ExecutionStats {
    pub fn accumulate<R>(&mut self, other: &R)
    where
        R: HasExecutionStats,
    {
        let timing = other.timing_information();
        self.timing_information.processing_time_milliseconds += timing.processing_time_milliseconds;

        let io = other.io_usage();
        self.io_usage.read_ios += io.read_ios;
        self.io_usage.write_ios += io.write_ios;
    }
}

pub trait HasExecutionStats {
    fn timing_information(&self) -> TimingInformation;
    fn io_usage(&self) -> IoUsage;

    fn extract_owned(&self) -> ExecutionStats
    where
        Self: Sized,
    {
        let mut new = ExecutionStats::default();
        new.accumulate(self);
        new
    }
}

impl HasExecutionStats for ExecutionStats {
    fn timing_information(&self) -> TimingInformation {
        self.timing_information
    }

    fn io_usage(&self) -> IoUsage {
        self.io_usage
    }
}

/// Implements the execution stats API for types that only have timing
/// information.
macro_rules! impl_execution_stats_1 {
    ($($t:ty),*) => ($(
        impl HasExecutionStats for $t {
            fn timing_information(&self) -> TimingInformation {
                self.timing_information
            }

            fn io_usage(&self) -> IoUsage {
                IoUsage::default()
            }
        }
    )*)
}

impl_execution_stats_1!(StartTransactionResult, AbortTransactionResult);

/// Implements for types that also have IO usage.
macro_rules! impl_execution_stats_2 {
    ($($t:ty),*) => ($(
        impl HasExecutionStats for $t {
            fn timing_information(&self) -> TimingInformation {
                self.timing_information
            }

            fn io_usage(&self) -> IoUsage {
                self.consumed_ios
            }
        }
    )*)
}

impl_execution_stats_2!(
    ExecuteStatementResult,
    FetchPageResult,
    CommitTransactionResult
);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Page;

    #[test]
    fn accumulates_timing_and_io() {
        let execute = ExecuteStatementResult {
            first_page: Page::default(),
            timing_information: TimingInformation {
                processing_time_milliseconds: 3,
            },
            consumed_ios: IoUsage {
                read_ios: 2,
                write_ios: 1,
            },
        };
        let start = StartTransactionResult {
            transaction_id: "tx".into(),
            timing_information: TimingInformation {
                processing_time_milliseconds: 1,
            },
        };

        let mut stats = execute.extract_owned();
        stats.accumulate(&start);
        stats.accumulate(&execute);

        assert_eq!(7, stats.timing_information.processing_time_milliseconds);
        assert_eq!(4, stats.io_usage.read_ios);
        assert_eq!(2, stats.io_usage.write_ios);
    }
}
