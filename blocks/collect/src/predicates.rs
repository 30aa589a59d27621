use std::collections::HashSet;

use collect_atoms::submissions::SubmissionFile;
use collect_atoms::tasks::CollectionItem;

/// Required items with no file among `files`. Always recomputed, never stored.
pub fn missing_required_items<'a>(
    items: &'a [CollectionItem],
    files: &[SubmissionFile],
) -> Vec<&'a CollectionItem> {
    let covered: HashSet<&str> = files.iter().map(|f| f.item_id.as_str()).collect();
    items
        .iter()
        .filter(|item| item.required && !covered.contains(item.item_id.as_str()))
        .collect()
}

pub fn is_missing_required(items: &[CollectionItem], files: &[SubmissionFile]) -> bool {
    !missing_required_items(items, files).is_empty()
}
