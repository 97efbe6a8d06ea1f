pub mod schema;

#[allow(unused_imports)]
pub use schema::{
    BreakerConfig, Config, FlowConfig, InferenceConfig, MemoryConfig, RoutingConfig,
    SessionConfig,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reexported_config_default_is_constructible() {
        let config = Config::default();

        assert!(config.routing.pattern_threshold > 0.0);
        assert!(config.routing.threshold_min <= config.routing.threshold_max);
        assert!(config.inference.request_timeout_secs > 0);
    }
}
