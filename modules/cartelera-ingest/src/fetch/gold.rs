//! Gold tier: paginated JSON APIs.

use tracing::{debug, warn};

use cartelera_common::{GoldSource, IngestError, Pagination};

use super::{HttpFetcher, RawRecord};

/// Dotted-path lookup into a JSON value. Empty path returns the value itself.
pub(crate) fn value_at<'a>(value: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    if path.is_empty() {
        return Some(value);
    }
    let mut current = value;
    for segment in path.split('.') {
        current = match current {
            serde_json::Value::Object(map) => map.get(segment)?,
            serde_json::Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Items array at the configured pointer; the root itself when the pointer is
/// empty. A non-array at the pointer is a content error.
fn extract_items(response: &serde_json::Value, items_path: &str) -> Result<Vec<RawRecord>, IngestError> {
    let node = value_at(response, items_path).ok_or_else(|| {
        IngestError::Content(format!("items path '{items_path}' missing from response"))
    })?;
    match node {
        serde_json::Value::Array(items) => Ok(items.clone()),
        _ => Err(IngestError::Content(format!(
            "items path '{items_path}' is not an array"
        ))),
    }
}

fn number_at(response: &serde_json::Value, path: &str) -> Option<u64> {
    if path.is_empty() {
        return None;
    }
    let node = value_at(response, path)?;
    node.as_u64()
        .or_else(|| node.as_str().and_then(|s| s.parse().ok()))
}

pub async fn fetch_gold(
    fetcher: &HttpFetcher,
    cfg: &GoldSource,
    max_pages: usize,
) -> Result<Vec<RawRecord>, IngestError> {
    let mut all = Vec::new();

    match cfg.pagination {
        Pagination::None => {
            let response = fetcher.limited_get_json(&cfg.url, &[]).await?;
            all = extract_items(&response, &cfg.items_path)?;
        }

        Pagination::OffsetLimit | Pagination::Socrata => {
            let (offset_param, limit_param) = match cfg.pagination {
                Pagination::Socrata => ("$offset".to_string(), "$limit".to_string()),
                _ => (cfg.offset_param.clone(), cfg.limit_param.clone()),
            };

            let mut offset: usize = 0;
            for _page in 0..max_pages {
                let query = vec![
                    (offset_param.clone(), offset.to_string()),
                    (limit_param.clone(), cfg.page_size.to_string()),
                ];
                let response = fetcher.limited_get_json(&cfg.url, &query).await?;
                let items = extract_items(&response, &cfg.items_path)?;
                let count = items.len();
                all.extend(items);

                debug!(source = %cfg.meta.slug, offset, count, "gold page fetched");

                if count < cfg.page_size {
                    break;
                }
                if let Some(total) = number_at(&response, &cfg.total_count_path) {
                    if all.len() as u64 >= total {
                        break;
                    }
                }
                offset += cfg.page_size;
            }
        }

        Pagination::Page => {
            let mut page: usize = 1;
            for _ in 0..max_pages {
                let query = vec![(cfg.page_param.clone(), page.to_string())];
                let response = fetcher.limited_get_json(&cfg.url, &query).await?;
                let items = extract_items(&response, &cfg.items_path)?;
                if items.is_empty() {
                    break;
                }
                let count = items.len();
                all.extend(items);

                debug!(source = %cfg.meta.slug, page, count, "gold page fetched");

                if let Some(total_pages) = number_at(&response, &cfg.total_pages_path) {
                    if page as u64 >= total_pages {
                        break;
                    }
                }
                page += 1;
            }
        }
    }

    if all.is_empty() {
        warn!(source = %cfg.meta.slug, "gold source returned no items");
    }
    Ok(all)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn value_at_walks_nested_objects() {
        let v = json!({"@graph": [{"title": "x"}], "meta": {"total": 42}});
        assert_eq!(value_at(&v, "meta.total"), Some(&json!(42)));
        assert_eq!(value_at(&v, ""), Some(&v));
        assert!(value_at(&v, "meta.missing").is_none());
    }

    #[test]
    fn value_at_indexes_arrays() {
        let v = json!({"items": [{"id": 1}, {"id": 2}]});
        assert_eq!(value_at(&v, "items.1.id"), Some(&json!(2)));
        assert!(value_at(&v, "items.5").is_none());
    }

    #[test]
    fn extract_items_handles_root_array() {
        let v = json!([{"id": 1}]);
        assert_eq!(extract_items(&v, "").unwrap().len(), 1);
    }

    #[test]
    fn extract_items_rejects_non_array() {
        let v = json!({"items": "nope"});
        assert!(extract_items(&v, "items").is_err());
    }

    #[test]
    fn number_at_parses_strings() {
        let v = json!({"total": "120"});
        assert_eq!(number_at(&v, "total"), Some(120));
        assert_eq!(number_at(&v, ""), None);
    }
}
