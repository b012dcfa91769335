//! Configuration parameters struct parsing helper.

/// Composes a configuration struct from its default values, then overwrites
/// given fields by parsing from given TOML string if it's not `None`. Returns
/// an `Ok(config)` on success, and `Err(ShoalError)` on parser failure or on
/// any key not named in the field list.
///
/// Example:
/// ```no_run
/// let config = parsed_config!(config_str => NodeConfig; fanout, drop_rate)?;
/// ```
#[macro_export]
macro_rules! parsed_config {
    ($config_str:expr => $config_type:ty; $($field:ident),+ $(,)?) => {{
        let config_str: Option<&str> = $config_str;

        // closure helper for easier error returning
        let compose_config = || -> Result<$config_type, $crate::utils::ShoalError> {
            let mut config: $config_type = Default::default();
            let Some(config_str) = config_str else {
                return Ok(config);
            };

            let mut table = config_str.parse::<toml::Table>()?;

            // traverse through all given field names
            $({
                // if field name found in table (and removed)
                if let Some(v) = table.remove(stringify!($field)) {
                    config.$field = v.try_into()?;
                }
            })+

            // if table is not empty at this time, some parsed keys are not
            // expected hence invalid
            if let Some(stray) = table.keys().next() {
                return Err($crate::utils::ShoalError(format!(
                    "invalid field name '{}' in config",
                    stray,
                )));
            }

            Ok(config)
        };

        compose_config()
    }};
}

#[cfg(test)]
mod config_tests {
    use crate::utils::ShoalError;

    #[derive(Debug, PartialEq)]
    struct TestConfig {
        degree: u16,
        root: String,
        rate: f64,
    }

    impl Default for TestConfig {
        fn default() -> Self {
            TestConfig {
                degree: 3,
                root: "/tmp/shoal".into(),
                rate: 0.25,
            }
        }
    }

    #[test]
    fn parse_from_none() -> Result<(), ShoalError> {
        let config = parsed_config!(None => TestConfig; degree, root, rate)?;
        let ref_config: TestConfig = Default::default();
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_from_partial() -> Result<(), ShoalError> {
        let config_str = Some("root = '/var/lib/shoal'");
        let config = parsed_config!(config_str => TestConfig; root, rate)?;
        let ref_config = TestConfig {
            degree: 3,
            root: "/var/lib/shoal".into(),
            rate: 0.25,
        };
        assert_eq!(config, ref_config);
        Ok(())
    }

    #[test]
    fn parse_invalid_field() {
        let config_str = Some("stray = 999");
        assert!(parsed_config!(config_str => TestConfig; degree).is_err());
    }
}
