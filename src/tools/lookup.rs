use serde::Deserialize;

use super::ToolOutcome;
use crate::store::ClassificationStore;

pub const NO_CLASSIFICATION: &str = "No classification found";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupInput {
    pub email_address: String,
}

pub(super) fn run(input: &LookupInput, store: &dyn ClassificationStore) -> ToolOutcome {
    match store.get(&input.email_address) {
        Some(record) => ToolOutcome::reply(record.classification),
        None => ToolOutcome::reply(NO_CLASSIFICATION),
    }
}
