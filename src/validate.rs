use std::collections::{BTreeMap, HashMap};

use crate::error::ApiError;
use crate::models::Id;

/// Request validator: pulls typed values out of a raw form/query field map and
/// collects every per-field failure so one 422 reports them all.
///
/// The `require_*`/`optional_*` accessors return a placeholder (zero/empty/
/// default) when the field is rejected; callers must run [`Validator::finish`]
/// before using any returned value. Business rules (ownership, locking) are
/// out of scope here and belong to the authorization layer.
pub struct Validator<'a> {
    fields: &'a HashMap<String, String>,
    errors: BTreeMap<String, String>,
}

impl<'a> Validator<'a> {
    pub fn new(fields: &'a HashMap<String, String>) -> Self {
        Self { fields, errors: BTreeMap::new() }
    }

    fn raw(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(|v| v.trim()).filter(|v| !v.is_empty())
    }

    fn reject(&mut self, name: &str, message: impl Into<String>) {
        // First failure per field wins.
        self.errors.entry(name.to_string()).or_insert_with(|| message.into());
    }

    /// Required positive integer identifier.
    pub fn require_id(&mut self, name: &str) -> Id {
        match self.raw(name).map(str::parse::<Id>) {
            Some(Ok(id)) if id > 0 => id,
            Some(_) => {
                self.reject(name, "must be a positive integer");
                0
            }
            None => {
                self.reject(name, "is required");
                0
            }
        }
    }

    /// Required non-empty string with character-length bounds.
    pub fn require_text(&mut self, name: &str, min: usize, max: usize) -> String {
        let Some(value) = self.raw(name) else {
            self.reject(name, "is required");
            return String::new();
        };
        let len = value.chars().count();
        if len < min {
            self.reject(name, format!("must be at least {min} characters"));
            String::new()
        } else if len > max {
            self.reject(name, format!("must be at most {max} characters"));
            String::new()
        } else {
            value.to_string()
        }
    }

    /// Required integer inside an inclusive range.
    pub fn require_int(&mut self, name: &str, min: i64, max: i64) -> i64 {
        match self.raw(name).map(str::parse::<i64>) {
            Some(Ok(n)) if (min..=max).contains(&n) => n,
            Some(Ok(_)) => {
                self.reject(name, format!("must be between {min} and {max}"));
                min
            }
            Some(Err(_)) => {
                self.reject(name, "must be an integer");
                min
            }
            None => {
                self.reject(name, "is required");
                min
            }
        }
    }

    /// Optional integer with a default, still range-checked when present.
    pub fn optional_int(&mut self, name: &str, default: i64, min: i64, max: i64) -> i64 {
        match self.raw(name) {
            None => default,
            Some(v) => match v.parse::<i64>() {
                Ok(n) if (min..=max).contains(&n) => n,
                Ok(_) => {
                    self.reject(name, format!("must be between {min} and {max}"));
                    default
                }
                Err(_) => {
                    self.reject(name, "must be an integer");
                    default
                }
            },
        }
    }

    /// Required enum-ish string; rejected unless one of `allowed`.
    pub fn require_choice(&mut self, name: &str, allowed: &[&str]) -> String {
        match self.raw(name) {
            Some(value) if allowed.contains(&value) => value.to_string(),
            Some(_) => {
                self.reject(name, format!("must be one of: {}", allowed.join(", ")));
                String::new()
            }
            None => {
                self.reject(name, "is required");
                String::new()
            }
        }
    }

    /// Optional enum-ish string; rejected unless one of `allowed`.
    pub fn optional_choice(&mut self, name: &str, allowed: &[&str]) -> Option<String> {
        let value = self.raw(name)?;
        if allowed.contains(&value) {
            Some(value.to_string())
        } else {
            self.reject(name, format!("must be one of: {}", allowed.join(", ")));
            None
        }
    }

    /// Truthy query flag (`1` / `true`).
    pub fn flag(&self, name: &str) -> bool {
        matches!(self.raw(name), Some("1") | Some("true"))
    }

    pub fn finish(self) -> Result<(), ApiError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self.errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn collects_all_field_errors() {
        let f = fields(&[("post_id", "abc"), ("content", "")]);
        let mut v = Validator::new(&f);
        v.require_id("post_id");
        v.require_text("content", 2, 100);
        v.require_text("csrf_token", 1, 128);
        let err = v.finish().unwrap_err();
        let ApiError::Validation(map) = err else { panic!("expected validation error") };
        assert_eq!(map.len(), 3);
        assert_eq!(map["post_id"], "must be a positive integer");
        assert_eq!(map["content"], "is required");
        assert_eq!(map["csrf_token"], "is required");
    }

    #[test]
    fn accepts_valid_fields() {
        let f = fields(&[("topic_id", "7"), ("rating", "4"), ("page", "2")]);
        let mut v = Validator::new(&f);
        assert_eq!(v.require_id("topic_id"), 7);
        assert_eq!(v.require_int("rating", 1, 5), 4);
        assert_eq!(v.optional_int("page", 1, 1, 10_000), 2);
        assert_eq!(v.optional_int("limit", 20, 1, 100), 20);
        assert!(v.finish().is_ok());
    }

    #[test]
    fn rejects_out_of_range_numbers() {
        let f = fields(&[("rating", "9"), ("limit", "500")]);
        let mut v = Validator::new(&f);
        v.require_int("rating", 1, 5);
        v.optional_int("limit", 20, 1, 100);
        let ApiError::Validation(map) = v.finish().unwrap_err() else { panic!() };
        assert_eq!(map["rating"], "must be between 1 and 5");
        assert_eq!(map["limit"], "must be between 1 and 100");
    }

    #[test]
    fn zero_and_negative_ids_are_rejected() {
        let f = fields(&[("a", "0"), ("b", "-3")]);
        let mut v = Validator::new(&f);
        v.require_id("a");
        v.require_id("b");
        let ApiError::Validation(map) = v.finish().unwrap_err() else { panic!() };
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn require_choice_rejects_unknown_and_missing() {
        let f = fields(&[("action", "publish")]);
        let mut v = Validator::new(&f);
        v.require_choice("action", &["approve", "reject"]);
        v.require_choice("mode", &["a", "b"]);
        let ApiError::Validation(map) = v.finish().unwrap_err() else { panic!() };
        assert_eq!(map["action"], "must be one of: approve, reject");
        assert_eq!(map["mode"], "is required");
    }

    #[test]
    fn optional_choice_and_flag() {
        let f = fields(&[("status", "approved"), ("include_deleted", "1")]);
        let mut v = Validator::new(&f);
        assert_eq!(v.optional_choice("status", &["pending", "approved", "rejected"]), Some("approved".into()));
        assert!(v.flag("include_deleted"));
        assert!(!v.flag("missing"));
        assert!(v.finish().is_ok());
    }

    #[test]
    fn length_bounds_count_chars_not_bytes() {
        let f = fields(&[("title", "héllo")]);
        let mut v = Validator::new(&f);
        assert_eq!(v.require_text("title", 5, 10), "héllo");
        assert!(v.finish().is_ok());
    }
}
