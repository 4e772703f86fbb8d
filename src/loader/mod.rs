//! Reference stock list: the universe a crawl works through.

use crate::error::CrawlError;
use crate::models::WorkItem;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

/// Reads `code,name[,...]` rows (header row expected). Codes that do not start
/// with a digit are ignored; the result is sorted by code with duplicates
/// collapsed onto their first name.
pub fn load_reference_list(path: &Path) -> Result<Vec<WorkItem>, CrawlError> {
    if !path.exists() {
        return Err(CrawlError::Setup(format!("reference list {:?} not found", path)));
    }

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| CrawlError::Setup(format!("cannot open {:?}: {}", path, e)))?;

    let mut by_code: BTreeMap<String, String> = BTreeMap::new();
    for (i, result) in reader.records().enumerate() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("Row {} in {:?}: {}", i + 1, path, e);
                continue;
            }
        };

        let code = record.get(0).unwrap_or("");
        if !code.starts_with(|c: char| c.is_ascii_digit()) {
            debug!("Skipping row {} ({:?})", i + 1, code);
            continue;
        }
        let name = record.get(1).unwrap_or("");
        by_code.entry(code.to_string()).or_insert_with(|| name.to_string());
    }

    if by_code.is_empty() {
        return Err(CrawlError::Setup(format!("reference list {:?} has no stock codes", path)));
    }

    info!("{} stocks in {:?}", by_code.len(), path);
    Ok(by_code
        .into_iter()
        .map(|(code, name)| WorkItem::new(code, name))
        .collect())
}

/// `items[start_index..start_index + limit]`, clamped to the list.
pub fn shard(items: Vec<WorkItem>, start_index: usize, limit: Option<usize>) -> Vec<WorkItem> {
    items
        .into_iter()
        .skip(start_index)
        .take(limit.unwrap_or(usize::MAX))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn csv_file(body: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(body.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_filters_sorts_and_dedups() {
        let f = csv_file(
            "代號,名稱,產業別\n2330,台積電,半導體\n1101,台泥,水泥\n合計,,\n 2317 , 鴻海 ,電子\n1101,重複,水泥\n",
        );
        let items = load_reference_list(f.path()).unwrap();
        let codes: Vec<&str> = items.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(codes, vec!["1101", "2317", "2330"]);
        assert_eq!(items[0].display_name, "台泥");
        assert_eq!(items[1].display_name, "鴻海");
    }

    #[test]
    fn test_missing_or_empty_list_is_setup_error() {
        let err = load_reference_list(Path::new("/nonexistent/twse_industry.csv")).unwrap_err();
        assert!(matches!(err, CrawlError::Setup(_)));

        let f = csv_file("代號,名稱\n");
        assert!(matches!(load_reference_list(f.path()), Err(CrawlError::Setup(_))));
    }

    #[test]
    fn test_shard() {
        let items: Vec<WorkItem> = ["1101", "1102", "2330", "2317"].iter().map(|c| WorkItem::new(*c, "")).collect();

        let ids = |v: Vec<WorkItem>| v.into_iter().map(|i| i.id).collect::<Vec<_>>();
        assert_eq!(ids(shard(items.clone(), 1, Some(2))), vec!["1102", "2330"]);
        assert_eq!(ids(shard(items.clone(), 3, None)), vec!["2317"]);
        assert!(shard(items.clone(), 10, Some(5)).is_empty());
        assert_eq!(shard(items, 0, None).len(), 4);
    }
}
