//! The echo service.

use crate::rpc::registry::{Described, FieldSchema, MessageSchema, MethodTableBuilder};
use crate::rpc::status::RpcError;

pub const SERVICE: &str = "echo.EchoService";
pub const ECHO: &str = "Echo";

/// Request and response of `Echo`.
#[derive(Clone, PartialEq, prost::Message)]
pub struct EchoMessage {
    #[prost(string, tag = "1")]
    pub value: String,
}

impl Described for EchoMessage {
    const SCHEMA: MessageSchema = MessageSchema {
        name: "echo.EchoMessage",
        fields: &[FieldSchema {
            name: "value",
            number: 1,
            kind: "string",
        }],
    };
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

impl EchoService {
    pub async fn echo(&self, request: EchoMessage) -> Result<EchoMessage, RpcError> {
        Ok(EchoMessage {
            value: format!("ACK {}", request.value),
        })
    }
}

/// Add the echo methods to a table.
pub fn register(builder: MethodTableBuilder) -> MethodTableBuilder {
    let service = EchoService;
    builder.unary(SERVICE, ECHO, move |request: EchoMessage| async move {
        service.echo(request).await
    })
}
