#![forbid(unsafe_code)]

mod error;
pub use error::{Error, ErrorKind, ResponseError, Result};

mod value;
pub use value::{Map, Value};

mod upload;
pub use upload::{UPLOAD_MARKER, Upload, Uploads, resolve_uploads};

pub mod types;
pub use types::{Matcher, Schema, Type, TypeNode};

mod single_flight;
pub use single_flight::SingleFlight;

mod metadata;
pub use metadata::Metadata;

mod context;
pub use context::{Context, ContextArgs, ContextGenerator, ContextManager};

mod msg;
pub use msg::{ClientMessage, EndpointResponse, Response, ServerMessage, SubscriptionKey};

mod channel;

mod subscription;
pub use subscription::Subscription;

mod endpoint;
pub use endpoint::{RequestArgs, RequestEndpoint, SubscriptionArgs, SubscriptionEndpoint};

mod router;
pub use router::Router;

mod socket;
pub use socket::Socket;

mod batch;
pub use batch::{BatchBody, ENDPOINTS_FIELD, resolve_batch};

mod config;
pub use config::ServerConfig;

mod task_supervisor;
pub use task_supervisor::TaskSupervisor;

mod http;
mod ws;

mod state;
pub use state::State;

mod listener;

mod server;
pub use server::Server;
