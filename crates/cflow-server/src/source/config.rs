//! Source configuration declaration and resolution
//!
//! Each content source declares the parameters it accepts as a static table
//! of [`ConfigItem`]s. At init time the supplied key/value map is resolved
//! against that table: keys are folded to lower case, required items are
//! enforced, and integer-typed values are validated up front so a bad value
//! can never surface later as a surprise.

use cflow_common::{FlowError, Result};
use std::collections::HashMap;

/// Value type of a declared configuration item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigType {
    String,
    Integer,
}

/// One named, typed, optionally-required configuration item
///
/// Declared statically per source implementation; immutable after
/// declaration. Names are matched case-insensitively.
#[derive(Debug, Clone, Copy)]
pub struct ConfigItem {
    pub name: &'static str,
    pub title: &'static str,
    pub required: bool,
    pub config_type: ConfigType,
}

impl ConfigItem {
    pub const fn required(name: &'static str, title: &'static str, config_type: ConfigType) -> Self {
        Self { name, title, required: true, config_type }
    }

    pub const fn optional(name: &'static str, title: &'static str, config_type: ConfigType) -> Self {
        Self { name, title, required: false, config_type }
    }
}

/// Resolved source configuration
///
/// Holds every supplied key/value pair with keys folded to lower case, plus
/// the declaration table it was validated against. Typed getters convert
/// according to the declared [`ConfigType`]; absent optional items resolve to
/// the type's zero value.
#[derive(Debug, Clone)]
pub struct SourceParams {
    declared: &'static [ConfigItem],
    values: HashMap<String, String>,
}

impl SourceParams {
    /// Validate the supplied parameters against the declaration table
    ///
    /// Fails with a configuration error if a required item is absent or an
    /// integer-typed value does not parse. Nothing is partially applied: on
    /// error no `SourceParams` exists.
    pub fn resolve(
        declared: &'static [ConfigItem],
        supplied: &HashMap<String, String>,
    ) -> Result<Self> {
        let values: HashMap<String, String> = supplied
            .iter()
            .map(|(k, v)| (k.to_lowercase(), v.clone()))
            .collect();

        for item in declared.iter().filter(|i| i.required) {
            if !values.contains_key(&item.name.to_lowercase()) {
                return Err(FlowError::Configuration(format!(
                    "the config item '{}' is not present in parameters",
                    item.name
                )));
            }
        }

        let params = Self { declared, values };

        // Reject unconvertible integers at init rather than at first use.
        for item in declared.iter().filter(|i| i.config_type == ConfigType::Integer) {
            params.integer(item.name)?;
        }

        Ok(params)
    }

    fn item(&self, name: &str) -> Result<&ConfigItem> {
        self.declared
            .iter()
            .find(|i| i.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                FlowError::Configuration(format!("the config item '{}' is not declared", name))
            })
    }

    fn raw(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_lowercase()).map(|s| s.as_str())
    }

    /// Resolve a string-typed item; absent optional values resolve to `""`
    pub fn string(&self, name: &str) -> Result<String> {
        let item = self.item(name)?;
        if item.config_type != ConfigType::String {
            return Err(FlowError::Configuration(format!(
                "the config item '{}' is not a string",
                name
            )));
        }
        Ok(self.raw(name).unwrap_or_default().to_string())
    }

    /// Resolve an integer-typed item; absent optional values resolve to `0`
    pub fn integer(&self, name: &str) -> Result<i64> {
        let item = self.item(name)?;
        if item.config_type != ConfigType::Integer {
            return Err(FlowError::Configuration(format!(
                "the config item '{}' is not an integer",
                name
            )));
        }
        match self.raw(name) {
            None => Ok(0),
            Some(value) => value.parse::<i64>().map_err(|_| {
                FlowError::Configuration(format!(
                    "the config item '{}' has an unconvertible value '{}'",
                    name, value
                ))
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEMS: &[ConfigItem] = &[
        ConfigItem::required("path", "Directory to watch", ConfigType::String),
        ConfigItem::optional("filter", "Filename filter", ConfigType::String),
        ConfigItem::optional("interval", "Poll interval in seconds", ConfigType::Integer),
    ];

    fn supplied(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_round_trips_supplied_values() {
        let params =
            SourceParams::resolve(ITEMS, &supplied(&[("path", "/data/in"), ("interval", "30")]))
                .unwrap();

        assert_eq!(params.string("path").unwrap(), "/data/in");
        assert_eq!(params.integer("interval").unwrap(), 30);
    }

    #[test]
    fn test_keys_match_case_insensitively() {
        let params = SourceParams::resolve(ITEMS, &supplied(&[("PATH", "/data/in")])).unwrap();
        assert_eq!(params.string("Path").unwrap(), "/data/in");
    }

    #[test]
    fn test_missing_required_item_fails() {
        let err = SourceParams::resolve(ITEMS, &supplied(&[("filter", "*.csv")])).unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn test_absent_optional_values_resolve_to_zero_values() {
        let params = SourceParams::resolve(ITEMS, &supplied(&[("path", "/data/in")])).unwrap();
        assert_eq!(params.string("filter").unwrap(), "");
        assert_eq!(params.integer("interval").unwrap(), 0);
    }

    #[test]
    fn test_unconvertible_integer_fails_at_resolve() {
        let err = SourceParams::resolve(
            ITEMS,
            &supplied(&[("path", "/data/in"), ("interval", "soon")]),
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::Configuration(_)));
    }

    #[test]
    fn test_undeclared_item_is_a_configuration_error() {
        let params = SourceParams::resolve(ITEMS, &supplied(&[("path", "/data/in")])).unwrap();
        assert!(params.string("host").is_err());
    }

    #[test]
    fn test_type_mismatch_is_a_configuration_error() {
        let params = SourceParams::resolve(ITEMS, &supplied(&[("path", "/data/in")])).unwrap();
        assert!(params.integer("path").is_err());
        assert!(params.string("interval").is_err());
    }
}
