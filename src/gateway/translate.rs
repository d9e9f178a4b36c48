//! JSON ⇄ RPC message translation.
//!
//! # Responsibilities
//! - Merge the JSON body and path parameters into one field set
//! - Build request messages field by field, rejecting unknown fields
//! - Render response messages back to JSON
//!
//! # Design Decisions
//! - Each message spells out its own mapping (no reflective copy)
//! - Path parameters override body fields of the same name
//! - An empty body is `{}`; any other non-object body is rejected

use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use bytes::Bytes;
use serde_json::{json, Map, Value};
use thiserror::Error;

use crate::gateway::routes::BodyBinding;
use crate::rpc::echo::{self, EchoMessage};
use crate::rpc::registry::method_path;
use crate::rpc::RpcError;

#[derive(Debug, Error)]
pub enum TranslateError {
    #[error("request body is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("request body must be a JSON object")]
    NotAnObject,

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("field {field:?} must be a {expected}")]
    WrongType {
        field: String,
        expected: &'static str,
    },

    #[error("upstream returned a malformed message: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl From<TranslateError> for RpcError {
    fn from(err: TranslateError) -> Self {
        match err {
            TranslateError::Decode(_) => RpcError::internal(err.to_string()),
            _ => RpcError::invalid_argument(err.to_string()),
        }
    }
}

/// Fields of one request, consumed by a message's mapping.
#[derive(Debug, Default)]
pub struct FieldSource {
    fields: Map<String, Value>,
}

impl FieldSource {
    /// Merge `body` (per `binding`) with path parameters.
    pub fn new(
        body: &[u8],
        binding: BodyBinding,
        params: Vec<(String, String)>,
    ) -> Result<Self, TranslateError> {
        let mut fields = match binding {
            BodyBinding::None => Map::new(),
            BodyBinding::Whole if body.iter().all(u8::is_ascii_whitespace) => Map::new(),
            BodyBinding::Whole => match serde_json::from_slice::<Value>(body)? {
                Value::Object(map) => map,
                _ => return Err(TranslateError::NotAnObject),
            },
        };

        for (name, value) in params {
            fields.insert(name, Value::String(value));
        }
        Ok(Self { fields })
    }

    /// Remove a string field. JSON `null` counts as absent.
    pub fn take_string(&mut self, name: &str) -> Result<Option<String>, TranslateError> {
        match self.fields.remove(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) => Ok(Some(s)),
            Some(_) => Err(TranslateError::WrongType {
                field: name.to_string(),
                expected: "string",
            }),
        }
    }

    /// Fail on any field no mapping consumed.
    pub fn finish(self) -> Result<(), TranslateError> {
        match self.fields.into_iter().next() {
            Some((name, _)) => Err(TranslateError::UnknownField(name)),
            None => Ok(()),
        }
    }
}

/// Build a request message from request fields.
pub trait FromFields: Sized {
    fn from_fields(fields: &mut FieldSource) -> Result<Self, TranslateError>;
}

/// Render a response message as JSON.
pub trait ToJson {
    fn to_json(&self) -> Value;
}

impl FromFields for EchoMessage {
    fn from_fields(fields: &mut FieldSource) -> Result<Self, TranslateError> {
        Ok(EchoMessage {
            value: fields.take_string("value")?.unwrap_or_default(),
        })
    }
}

impl ToJson for EchoMessage {
    fn to_json(&self) -> Value {
        json!({ "value": self.value })
    }
}

/// Translation for one RPC method.
pub trait RpcBinding: Send + Sync {
    fn encode_request(&self, fields: FieldSource) -> Result<Bytes, TranslateError>;
    fn decode_response(&self, payload: Bytes) -> Result<Value, TranslateError>;
}

/// Binding through a request and response message type.
pub struct TypedBinding<Req, Resp>(PhantomData<fn() -> (Req, Resp)>);

impl<Req, Resp> TypedBinding<Req, Resp> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<Req, Resp> Default for TypedBinding<Req, Resp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<Req, Resp> RpcBinding for TypedBinding<Req, Resp>
where
    Req: FromFields + prost::Message,
    Resp: ToJson + prost::Message + Default,
{
    fn encode_request(&self, mut fields: FieldSource) -> Result<Bytes, TranslateError> {
        let request = Req::from_fields(&mut fields)?;
        fields.finish()?;
        Ok(Bytes::from(request.encode_to_vec()))
    }

    fn decode_response(&self, payload: Bytes) -> Result<Value, TranslateError> {
        Ok(Resp::decode(payload)?.to_json())
    }
}

/// Bindings for every method the gateway can translate.
#[derive(Clone, Default)]
pub struct BindingSet {
    by_path: HashMap<String, Arc<dyn RpcBinding>>,
}

impl BindingSet {
    /// Bindings for the built-in services.
    pub fn standard() -> Self {
        Self::default().with(
            method_path(echo::SERVICE, echo::ECHO),
            TypedBinding::<EchoMessage, EchoMessage>::new(),
        )
    }

    pub fn with(mut self, path: String, binding: impl RpcBinding + 'static) -> Self {
        self.by_path.insert(path, Arc::new(binding));
        self
    }

    pub fn get(&self, path: &str) -> Option<&Arc<dyn RpcBinding>> {
        self.by_path.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }
}
