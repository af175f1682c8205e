use std::{collections::HashMap, sync::Arc};

use foldhash::fast::RandomState;
use futures_util::future::join_all;

use crate::{
    Context, EndpointResponse, Error, ErrorKind, Metadata, Response, Result, Router, Uploads,
    resolve_uploads,
};

/// Name of the multipart field holding the `{name: params}` JSON object.
pub const ENDPOINTS_FIELD: &str = "endpoints";

/// A fully decoded multipart batch body.
#[derive(Clone, Debug, Default)]
pub struct BatchBody {
    pub fields: HashMap<String, String, RandomState>,
    pub uploads: Uploads,
}

impl BatchBody {
    /// Parses the endpoints field into `(name, params)` pairs.
    ///
    /// # Errors
    ///
    /// Returns a `Protocol` error if the field is missing, not an object or
    /// empty, and a `Transport` error if it is not JSON.
    pub fn endpoints(&self) -> Result<serde_json::Map<String, serde_json::Value>> {
        let Some(text) = self.fields.get(ENDPOINTS_FIELD) else {
            return Err(Error::new(
                ErrorKind::Protocol,
                "Endpoints field not found in request body.",
            ));
        };
        let value: serde_json::Value = serde_json::from_str(text)
            .map_err(|_| Error::new(ErrorKind::Transport, "Malformed request."))?;
        let serde_json::Value::Object(endpoints) = value else {
            return Err(Error::new(
                ErrorKind::Protocol,
                "Endpoints field is not an object.",
            ));
        };
        if endpoints.is_empty() {
            return Err(Error::new(
                ErrorKind::Protocol,
                "Endpoints field is an empty object.",
            ));
        }
        Ok(endpoints)
    }
}

/// Resolves every endpoint of a batch concurrently.
///
/// Envelope and context failures become the top-level error. Everything that
/// goes wrong for one endpoint stays in that endpoint's entry.
pub async fn resolve_batch(router: &Router, metadata: Arc<Metadata>, body: BatchBody) -> Response {
    let endpoints = match body.endpoints() {
        Ok(endpoints) => endpoints,
        Err(err) => {
            tracing::warn!("reject batch: {err}");
            return Response::error(&err);
        }
    };

    let context = match router
        .context_manager()
        .generate(metadata.clone())
        .get_context()
        .await
    {
        Ok(context) => context,
        Err(err) => {
            tracing::warn!("build context failed: {err}");
            return Response::error(&err);
        }
    };

    let uploads = &body.uploads;
    let results = join_all(endpoints.into_iter().map(|(name, params)| {
        let metadata = metadata.clone();
        let context = context.clone();
        async move {
            let result = invoke(router, &name, params, uploads, metadata, context).await;
            if let Err(err) = &result {
                tracing::debug!("endpoint {name} failed: {err}");
            }
            (name, EndpointResponse::from(result))
        }
    }))
    .await;

    Response::results(results.into_iter().collect())
}

async fn invoke(
    router: &Router,
    name: &str,
    params: serde_json::Value,
    uploads: &Uploads,
    metadata: Arc<Metadata>,
    context: Context,
) -> Result<crate::Value> {
    let endpoint = router
        .request(name)
        .ok_or_else(|| Error::new(ErrorKind::Lookup, "Request endpoint not found."))?;
    let params = resolve_uploads(params.into(), uploads);
    endpoint.invoke(metadata, params, context).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ContextManager, RequestArgs, RequestEndpoint, Schema, Type, Upload};
    use serde_json::json;
    use std::time::Duration;

    fn body(endpoints: &str) -> BatchBody {
        let mut body = BatchBody::default();
        body.fields.insert(ENDPOINTS_FIELD.to_string(), endpoints.to_string());
        body
    }

    fn router() -> Router {
        let mut router = Router::default().with_context(
            ContextManager::default().handler("greeting", |_| async { Ok("Hello".to_string()) }),
        );
        router.add_request(
            "hello",
            RequestEndpoint::new(|args: RequestArgs| async move {
                let greeting = args.context.get::<String>("greeting").cloned().unwrap_or_default();
                let name = args.params.field("name").as_str().unwrap_or_default().to_string();
                Ok(format!("{greeting}, {name}!"))
            })
            .params(Schema::new().field("name", Type::string()))
            .result(Type::string()),
        );
        router.add_request(
            "slow",
            RequestEndpoint::new(|_| async {
                tokio::time::sleep(Duration::from_millis(30)).await;
                Ok(true)
            })
            .result(Type::boolean()),
        );
        router.add_request(
            "fail",
            RequestEndpoint::new(|_| async { Err::<(), _>(Error::with_code(7, "Nope.")) }),
        );
        router.add_request(
            "size",
            RequestEndpoint::new(|args: RequestArgs| async move {
                let size = args.params.field("file").as_upload().map_or(0, |u| u.size());
                Ok(size as i64)
            })
            .params(Schema::new().field("file", Type::upload()))
            .result(Type::integer()),
        );
        router
    }

    async fn resolve(router: &Router, body: BatchBody) -> serde_json::Value {
        let rsp = resolve_batch(router, Arc::new(Metadata::default()), body).await;
        serde_json::to_value(rsp).unwrap()
    }

    #[tokio::test]
    async fn test_errors_are_isolated() {
        let rsp = resolve(
            &router(),
            body(r#"{"hello": {"name": "alice"}, "slow": null, "fail": null, "unknown": null, "size": {"file": 1}}"#),
        )
        .await;
        assert_eq!(
            rsp,
            json!({
                "result": {
                    "hello": {"result": "Hello, alice!", "error": null},
                    "slow": {"result": true, "error": null},
                    "fail": {"result": null, "error": {"code": 7, "message": "Nope."}},
                    "unknown": {"result": null, "error": {"code": null, "message": "Request endpoint not found."}},
                    "size": {"result": null, "error": {"code": null, "message": "Invalid param value for \"file\"."}},
                },
                "error": null,
            })
        );
    }

    #[tokio::test]
    async fn test_uploads() {
        let mut body = body(r#"{"size": {"file": {"__upload__": 0}}}"#);
        body.uploads.insert(
            "0".to_string(),
            Arc::new(Upload {
                buffer: "hello".into(),
                filename: "a.txt".into(),
                encoding: "7bit".into(),
                mime_type: "text/plain".into(),
            }),
        );
        let rsp = resolve(&router(), body).await;
        assert_eq!(rsp["result"]["size"]["result"], 5);
    }

    #[tokio::test]
    async fn test_envelope_errors() {
        let router = router();
        for (body, message) in [
            (BatchBody::default(), "Endpoints field not found in request body."),
            (body("{"), "Malformed request."),
            (body("[]"), "Endpoints field is not an object."),
            (body("{}"), "Endpoints field is an empty object."),
        ] {
            assert_eq!(
                resolve(&router, body).await,
                json!({"result": null, "error": {"code": null, "message": message}})
            );
        }
    }

    #[tokio::test]
    async fn test_context_failure() {
        let mut router = Router::default().with_context(
            ContextManager::default()
                .handler("user", |_| async { Err::<(), _>(Error::with_code(401, "Unauthorized.")) }),
        );
        router.add_request("a", RequestEndpoint::new(|_| async { Ok(()) }));
        assert_eq!(
            resolve(&router, body(r#"{"a": null}"#)).await,
            json!({"result": null, "error": {"code": 401, "message": "Unauthorized."}})
        );
    }
}
