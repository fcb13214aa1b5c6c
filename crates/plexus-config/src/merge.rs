/// Recursively merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the
/// base value.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                match base_table.get_mut(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => {
                        base_table.insert(key.clone(), value.clone());
                    },
                }
            }
        },
        (base, overlay) => *base = overlay.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_tables_merge() {
        let mut base: toml::Value = toml::from_str(
            r#"
            max_running_plugins = 3
            [log]
            level = "info"
            format = "pretty"
        "#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
            [log]
            level = "debug"
            [tags."/intel"]
            dc = "east"
        "#,
        )
        .unwrap();
        deep_merge(&mut base, &overlay);

        assert_eq!(base["max_running_plugins"].as_integer(), Some(3));
        assert_eq!(base["log"]["level"].as_str(), Some("debug"));
        assert_eq!(base["log"]["format"].as_str(), Some("pretty"));
        assert_eq!(base["tags"]["/intel"]["dc"].as_str(), Some("east"));
    }

    #[test]
    fn test_arrays_replace() {
        let mut base: toml::Value = toml::from_str("keyring_paths = [\"a\", \"b\"]").unwrap();
        let overlay: toml::Value = toml::from_str("keyring_paths = [\"c\"]").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["keyring_paths"].as_array().unwrap().len(), 1);
    }
}
