use std::sync::Arc;

use hyper::header::HeaderValue;

use crate::{Error, ErrorKind, Result, Router, ServerConfig, TaskSupervisor};

/// Everything a connection task needs, shared by the whole server.
#[derive(Debug)]
pub struct State {
    pub router: Arc<Router>,
    pub config: ServerConfig,
    pub(crate) allow_origin: HeaderValue,
    pub(crate) supervisor: TaskSupervisor,
}

impl State {
    /// # Errors
    ///
    /// Returns `InvalidArgument` if `allow_origin` is not a valid header value
    /// or `outbound_queue_size` is zero.
    pub fn create(router: Router, config: &ServerConfig) -> Result<Arc<Self>> {
        if config.outbound_queue_size == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "outbound_queue_size must be positive",
            ));
        }
        let allow_origin = HeaderValue::from_str(&config.allow_origin).map_err(|e| {
            Error::new(
                ErrorKind::InvalidArgument,
                format!("invalid allow_origin {:?}: {e}", config.allow_origin),
            )
        })?;
        Ok(Arc::new(Self {
            router: Arc::new(router),
            config: config.clone(),
            allow_origin,
            supervisor: TaskSupervisor::default(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_rejects_invalid_config() {
        let config: ServerConfig = serde_json::from_str(r#"{"outbound_queue_size": 0}"#).unwrap();
        let err = State::create(Router::default(), &config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let config = ServerConfig {
            allow_origin: "bad\norigin".to_string(),
            ..Default::default()
        };
        let err = State::create(Router::default(), &config).unwrap_err();
        assert_eq!(err.kind, ErrorKind::InvalidArgument);

        let state = State::create(Router::default(), &ServerConfig::default()).unwrap();
        assert_eq!(state.allow_origin, "*");
    }
}
