use std::{future::Future, sync::Arc};

use futures_util::{FutureExt, future::BoxFuture};

use crate::{
    Context, Metadata, Result, Schema, Subscription, Type, Value,
    channel::Channels,
    types::{serialize_result, validate_params},
};

/// Input of a request resolver.
#[derive(Clone, Debug)]
pub struct RequestArgs {
    pub metadata: Arc<Metadata>,
    pub params: Value,
    pub context: Context,
}

/// Input of a subscription resolver.
#[derive(Clone, Debug)]
pub struct SubscriptionArgs {
    pub metadata: Arc<Metadata>,
    pub params: Value,
    pub context: Context,
    pub subscription: Subscription,
}

type RequestResolver = dyn Fn(RequestArgs) -> BoxFuture<'static, Result<Value>> + Send + Sync;
type SubscriptionResolver = dyn Fn(SubscriptionArgs) -> BoxFuture<'static, Result<()>> + Send + Sync;

/// A named operation resolved once per invocation.
pub struct RequestEndpoint {
    params: Option<Schema>,
    result: Option<Type>,
    resolver: Arc<RequestResolver>,
}

impl RequestEndpoint {
    pub fn new<F, Fut, R>(resolver: F) -> Self
    where
        F: Fn(RequestArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R>> + Send + 'static,
        R: Into<Value>,
    {
        Self {
            params: None,
            result: None,
            resolver: Arc::new(move |args| resolver(args).map(|r| r.map(Into::<Value>::into)).boxed()),
        }
    }

    #[must_use]
    pub fn params(mut self, schema: Schema) -> Self {
        self.params = Some(schema);
        self
    }

    #[must_use]
    pub fn result(mut self, ty: Type) -> Self {
        self.result = Some(ty);
        self
    }

    #[must_use]
    pub fn params_schema(&self) -> Option<&Schema> {
        self.params.as_ref()
    }

    #[must_use]
    pub fn result_type(&self) -> Option<&Type> {
        self.result.as_ref()
    }

    /// Validates `params`, runs the resolver and serializes its value.
    ///
    /// # Errors
    ///
    /// Returns the validation, resolver or serialization failure.
    pub async fn invoke(&self, metadata: Arc<Metadata>, params: Value, context: Context) -> Result<Value> {
        validate_params(self.params_schema(), &params)?;
        let value = (self.resolver)(RequestArgs {
            metadata,
            params,
            context,
        })
        .await?;
        serialize_result(self.result_type(), &value)
    }
}

impl std::fmt::Debug for RequestEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestEndpoint")
            .field("params", &self.params)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

/// A named operation whose resolver establishes channel membership; values
/// reach subscribers later through [`publish`](Self::publish).
///
/// Each subscription endpoint owns its channel namespace: a channel key only
/// addresses controllers subscribed through this endpoint.
pub struct SubscriptionEndpoint {
    params: Option<Schema>,
    result: Option<Type>,
    resolver: Arc<SubscriptionResolver>,
    pub(crate) channels: Channels,
}

impl SubscriptionEndpoint {
    pub fn new<F, Fut>(resolver: F) -> Self
    where
        F: Fn(SubscriptionArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        Self {
            params: None,
            result: None,
            resolver: Arc::new(move |args| resolver(args).boxed()),
            channels: Channels::default(),
        }
    }

    #[must_use]
    pub fn params(mut self, schema: Schema) -> Self {
        self.params = Some(schema);
        self
    }

    #[must_use]
    pub fn result(mut self, ty: Type) -> Self {
        self.result = Some(ty);
        self
    }

    #[must_use]
    pub fn params_schema(&self) -> Option<&Schema> {
        self.params.as_ref()
    }

    #[must_use]
    pub fn result_type(&self) -> Option<&Type> {
        self.result.as_ref()
    }

    pub(crate) async fn resolve(&self, args: SubscriptionArgs) -> Result<()> {
        (self.resolver)(args).await
    }

    /// Delivers `value` to every resolved controller subscribed to
    /// `channel_key`, serializing it separately for each of them. Returns the
    /// number of frames queued.
    pub fn publish(&self, channel_key: &str, value: impl Into<Value>) -> usize {
        let value = value.into();
        self.channels
            .listeners(channel_key)
            .iter()
            .filter(|controller| controller.deliver(self, &value))
            .count()
    }

    /// Number of controllers currently subscribed to `channel_key`.
    #[must_use]
    pub fn listener_count(&self, channel_key: &str) -> usize {
        self.channels.len(channel_key)
    }
}

impl std::fmt::Debug for SubscriptionEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionEndpoint")
            .field("params", &self.params)
            .field("result", &self.result)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ErrorKind;
    use serde_json::json;

    fn echo() -> RequestEndpoint {
        RequestEndpoint::new(|args: RequestArgs| async move {
            Ok(json!({"name": args.params.field("name").clone(), "secret": "x"}))
        })
        .params(Schema::new().field("name", Type::string()))
        .result(Type::schema(Schema::new().field("name", Type::string())))
    }

    #[tokio::test]
    async fn test_invoke() {
        let value = echo()
            .invoke(
                Arc::new(Metadata::default()),
                json!({"name": "alice"}).into(),
                Context::default(),
            )
            .await
            .unwrap();
        assert_eq!(value.to_json(), json!({"name": "alice"}));
    }

    #[tokio::test]
    async fn test_invoke_rejects_params_before_resolving() {
        let endpoint = RequestEndpoint::new(|_| async { Err::<(), _>(crate::Error::msg("unreachable")) });
        let err = endpoint
            .invoke(Arc::new(Metadata::default()), json!({"a": 1}).into(), Context::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Validation);
        assert_eq!(err.msg, "Invalid params value.");

        // no result type: only an empty result is accepted
        let endpoint = RequestEndpoint::new(|_| async { Ok(1i64) });
        let err = endpoint
            .invoke(Arc::new(Metadata::default()), Value::Null, Context::default())
            .await
            .unwrap_err();
        assert_eq!(err.msg, "Invalid result value.");
    }
}
