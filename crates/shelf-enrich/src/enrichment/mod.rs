pub mod dispatch;
pub mod google;
pub mod merge;

use serde::Serialize;

pub use dispatch::{
    ChannelDispatcher, DispatchDecision, EnrichmentDispatcher, EnrichmentWorker, WorkerSummary,
    request_amazon_enrichment,
};
pub use google::{GoogleEnrichment, GoogleOutcome, GoogleRun};
pub use merge::BookMergeExt;

/// What one enrichment run did to one book.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct EnrichmentReport {
    pub steps: Vec<String>,
    pub fields_updated: Vec<String>,
    pub sources_used: Vec<String>,
    pub errors: Vec<String>,
}

impl EnrichmentReport {
    pub fn add_step(&mut self, step: impl Into<String>) {
        self.steps.push(step.into());
    }

    pub fn add_source(&mut self, source: impl Into<String>) {
        push_unique(&mut self.sources_used, source.into());
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn add_fields<I>(&mut self, fields: I)
    where
        I: IntoIterator<Item = String>,
    {
        for field in fields {
            push_unique(&mut self.fields_updated, field);
        }
    }
}

fn push_unique(values: &mut Vec<String>, value: String) {
    if !values.iter().any(|existing| existing == &value) {
        values.push(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_deduplicates_sources_and_fields() {
        let mut report = EnrichmentReport::default();
        report.add_source("amazon");
        report.add_source("amazon");
        report.add_fields(vec!["isbn".to_string(), "isbn".to_string(), "publisher".to_string()]);
        report.add_step("searched");
        report.add_step("searched");
        assert_eq!(report.sources_used, vec!["amazon"]);
        assert_eq!(report.fields_updated, vec!["isbn", "publisher"]);
        assert_eq!(report.steps.len(), 2);
    }
}
