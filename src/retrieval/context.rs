use std::collections::HashSet;

use super::NamespaceHits;
use crate::database::SearchResult;

const SEPARATOR: &str = "\n\n";

/// Join retrieved chunk texts into one context block.
///
/// Namespaces are visited in `namespace_order`, skipping those without hits;
/// inside a namespace the best scores come first. Nothing is deduplicated
/// across namespaces.
#[inline]
pub fn assemble(hits: &[NamespaceHits], namespace_order: &[String]) -> String {
    let mut visited = HashSet::new();
    let mut texts: Vec<&str> = Vec::new();

    for namespace in namespace_order {
        if !visited.insert(namespace.as_str()) {
            continue;
        }
        let Some(group) = hits.iter().find(|group| &group.namespace == namespace) else {
            continue;
        };

        let mut results: Vec<&SearchResult> = group.results.iter().collect();
        results.sort_by(|a, b| b.score.total_cmp(&a.score));
        texts.extend(results.into_iter().map(|result| result.chunk.text.as_str()));
    }

    texts.join(SEPARATOR)
}
