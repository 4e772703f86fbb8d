//! JSON shape of one item inside a state file.
//!
//! In memory every category is date-major (`DatedRecord`). On disk the SMA and
//! history files are date-major too, while the daily institutional snapshot
//! nests dates under each investor field.

use crate::calendar::DateConvention;
use crate::models::{CategoryProfile, DatedRecord, ItemState, Layout, SortOrder};
use anyhow::{bail, Result};
use serde_json::{Map, Value};
use tracing::debug;

const NAME_KEY: &str = "StockName";

#[derive(Debug, Clone, Copy)]
pub struct StateCodec {
    pub convention: DateConvention,
    pub layout: Layout,
    pub order: SortOrder,
    pub stores_name: bool,
}

impl StateCodec {
    pub fn for_profile(profile: &CategoryProfile) -> Self {
        Self {
            convention: profile.convention,
            layout: profile.layout,
            order: profile.order,
            stores_name: profile.stores_name,
        }
    }

    pub fn decode(&self, value: &Value) -> Result<ItemState> {
        let Some(obj) = value.as_object() else {
            bail!("item entry is not a JSON object");
        };

        let mut state = ItemState {
            display_name: obj
                .get(NAME_KEY)
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            dated: DatedRecord::new(),
        };

        match self.layout {
            Layout::DateMajor => {
                for (key, v) in obj {
                    if key == NAME_KEY {
                        continue;
                    }
                    match v.as_object() {
                        Some(payload) if self.convention.is_key(key) => {
                            state.dated.insert(key.clone(), payload.clone());
                        }
                        _ => debug!("dropping non-date key {:?}", key),
                    }
                }
            }
            Layout::FieldMajor(fields) => {
                for field in fields {
                    let Some(by_date) = obj.get(*field).and_then(Value::as_object) else {
                        continue;
                    };
                    for (date, v) in by_date {
                        if !self.convention.is_key(date) {
                            debug!("dropping malformed date {:?} under {}", date, field);
                            continue;
                        }
                        state
                            .dated
                            .entry(date.clone())
                            .or_default()
                            .insert(field.to_string(), v.clone());
                    }
                }
            }
        }

        Ok(state)
    }

    pub fn encode(&self, state: &ItemState) -> Value {
        let mut obj = Map::new();
        if self.stores_name && !state.display_name.is_empty() {
            obj.insert(NAME_KEY.to_string(), Value::String(state.display_name.clone()));
        }

        let dates: Vec<&String> = match self.order {
            SortOrder::Ascending => state.dated.keys().collect(),
            SortOrder::Descending => state.dated.keys().rev().collect(),
        };

        match self.layout {
            Layout::DateMajor => {
                for date in dates {
                    obj.insert(date.clone(), Value::Object(state.dated[date].clone()));
                }
            }
            Layout::FieldMajor(fields) => {
                for field in fields {
                    let mut by_date = Map::new();
                    for date in &dates {
                        if let Some(v) = state.dated[*date].get(*field) {
                            by_date.insert((*date).clone(), v.clone());
                        }
                    }
                    obj.insert(field.to_string(), Value::Object(by_date));
                }
            }
        }

        Value::Object(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Category;
    use serde_json::json;

    #[test]
    fn test_field_major_transposes() {
        let codec = StateCodec::for_profile(&Category::Institutional.profile());
        let raw = json!({
            "StockName": "台積電",
            "ForeignInvestors": {"115/02/05": 1200, "115/02/04": -300},
            "InvestmentTrust": {"115/02/05": 15},
            "Dealers": {"115/02/05": 0},
            "DailyTotal": {"115/02/05": 1215}
        });

        let state = codec.decode(&raw).unwrap();
        assert_eq!(state.display_name, "台積電");
        assert_eq!(state.dated.len(), 2);
        assert_eq!(state.dated["115/02/05"]["DailyTotal"], 1215);
        assert_eq!(state.dated["115/02/04"].len(), 1);

        let back = codec.encode(&state);
        let keys: Vec<&String> = back["ForeignInvestors"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["115/02/05", "115/02/04"]);
        assert_eq!(back["InvestmentTrust"]["115/02/05"], 15);
    }

    #[test]
    fn test_date_major_sorted_ascending_and_drops_junk() {
        let codec = StateCodec::for_profile(&Category::Sma.profile());
        let raw = json!({
            "2026/02/05": {"SMA5": "612.40"},
            "StockName": "台泥",
            "Unknown": {"SMA5": "1"},
            "2026/02/04": {"SMA5": "610.00"}
        });

        let state = codec.decode(&raw).unwrap();
        assert_eq!(state.dated.len(), 2);

        let back = codec.encode(&state);
        let keys: Vec<&String> = back.as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["StockName", "2026/02/04", "2026/02/05"]);
    }

    #[test]
    fn test_history_files_carry_no_name() {
        let codec = StateCodec::for_profile(&Category::InstitutionalHistory.profile());
        let mut state = codec.decode(&json!({"2026/02/05": {"DailyTotal": 3}})).unwrap();
        state.display_name = "台積電".into();

        let back = codec.encode(&state);
        assert!(back.get("StockName").is_none());
        assert_eq!(back["2026/02/05"]["DailyTotal"], 3);
    }

    #[test]
    fn test_non_object_is_rejected() {
        let codec = StateCodec::for_profile(&Category::Sma.profile());
        assert!(codec.decode(&json!([1, 2])).is_err());
    }
}
