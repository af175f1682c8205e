use std::{any::Any, collections::HashMap, future::Future, sync::Arc};

use foldhash::fast::RandomState;
use futures_util::{FutureExt, future::BoxFuture};

use crate::{Metadata, Result, SingleFlight};

type Field = Arc<dyn Any + Send + Sync>;

/// Immutable snapshot of the fields produced by context handlers.
///
/// Shared by every resolver of one unit of work. Fields are typed: a handler
/// producing a `User` is read back with `ctx.get::<User>("user")`.
#[derive(Clone, Default)]
pub struct Context {
    fields: Arc<HashMap<String, Field, RandomState>>,
}

impl Context {
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<&T> {
        let field: &(dyn Any + Send + Sync) = &**self.fields.get(name)?;
        field.downcast_ref()
    }

    #[must_use]
    pub fn get_arc<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        self.fields.get(name)?.clone().downcast().ok()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn insert(&mut self, name: String, field: Field) {
        Arc::make_mut(&mut self.fields).insert(name, field);
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("fields", &self.fields.keys())
            .finish()
    }
}

/// Input of a context handler: the fields produced so far and the transport metadata.
#[derive(Clone, Debug)]
pub struct ContextArgs {
    pub context: Context,
    pub metadata: Arc<Metadata>,
}

type Handler = dyn Fn(ContextArgs) -> BoxFuture<'static, Result<Field>> + Send + Sync;

/// Ordered list of named context handlers.
///
/// ```rust
/// # use tyrpc::{ContextManager, Error};
/// #[derive(Clone)]
/// struct User(String);
///
/// let manager = ContextManager::default()
///     .handler("token", |args| async move {
///         Ok(args.metadata.header("authorization").unwrap_or_default().to_string())
///     })
///     .handler("user", |args| async move {
///         let token = args.context.get::<String>("token").cloned().unwrap_or_default();
///         if token.is_empty() {
///             return Err(Error::with_code(401, "Unauthorized."));
///         }
///         Ok(User(token))
///     });
/// # let _ = manager;
/// ```
#[derive(Clone, Default)]
pub struct ContextManager {
    handlers: Vec<(String, Arc<Handler>)>,
}

impl ContextManager {
    /// Declares a field. Handlers run in declaration order; redeclaring a
    /// name replaces its handler without moving it.
    #[must_use]
    pub fn handler<F, Fut, V>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(ContextArgs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V>> + Send + 'static,
        V: Any + Send + Sync,
    {
        let name = name.into();
        let handler: Arc<Handler> =
            Arc::new(move |args| f(args).map(|r| r.map(|v| Arc::new(v) as Field)).boxed());
        match self.handlers.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = handler,
            None => self.handlers.push((name, handler)),
        }
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.iter().map(|(n, _)| n.as_str())
    }

    /// Starts building a context for one unit of work.
    #[must_use]
    pub fn generate(&self, metadata: Arc<Metadata>) -> ContextGenerator {
        let handlers = self.handlers.clone();
        ContextGenerator {
            flight: SingleFlight::spawn(async move {
                let mut context = Context::default();
                for (name, handler) in handlers {
                    let args = ContextArgs {
                        context: context.clone(),
                        metadata: metadata.clone(),
                    };
                    let field = handler(args).await?;
                    context.insert(name, field);
                }
                Ok(context)
            }),
        }
    }
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager")
            .field("handlers", &self.names().collect::<Vec<_>>())
            .finish()
    }
}

/// Memoized context construction for one unit of work.
///
/// Generation starts on creation. Handlers run exactly once no matter how many
/// callers ask, and all of them observe the same context or the same error.
#[derive(Clone, Debug)]
pub struct ContextGenerator {
    flight: SingleFlight<Result<Context>>,
}

impl ContextGenerator {
    /// # Errors
    ///
    /// Returns the first handler failure.
    pub async fn get_context(&self) -> Result<Context> {
        self.flight.get().await
    }
}
