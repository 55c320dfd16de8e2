//! Handler trait for processing control-channel messages.
//!
//! Implementors provide the device logic (probing, uploads, raw writes)
//! while the server framework handles connection management and routing.

use std::future::Future;
use std::pin::Pin;

use xcom_protocol::{Envelope, Response};

use crate::connection::Client;

/// A boxed future returned by handler methods.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Trait for handling messages from a control-channel client.
///
/// The server dispatches parsed envelopes to the matching method. Each
/// method receives:
/// - `client`: the originating connection, used to reply
/// - `msg`: the parsed envelope with `type` split off
///
/// Default implementations reply with "not implemented" so handlers only
/// need to override the message types they care about.
pub trait Handler: Send + Sync + 'static {
    /// Called for `check_connection`.
    fn on_check_connection(&self, client: Client, msg: Envelope) -> HandlerFuture<'_>;

    /// Called for `file_upload`.
    fn on_file_upload(&self, client: Client, msg: Envelope) -> HandlerFuture<'_> {
        not_implemented(client, msg)
    }

    /// Called for `raw`.
    fn on_raw(&self, client: Client, msg: Envelope) -> HandlerFuture<'_> {
        not_implemented(client, msg)
    }

    /// Called for `abort_upload`.
    fn on_abort_upload(&self, client: Client, msg: Envelope) -> HandlerFuture<'_> {
        not_implemented(client, msg)
    }

    /// Called for `estimate_transfer`.
    fn on_estimate_transfer(&self, client: Client, msg: Envelope) -> HandlerFuture<'_> {
        not_implemented(client, msg)
    }

    /// Called once after the client's connection has closed.
    fn on_client_disconnected(&self, _client: Client) -> HandlerFuture<'_> {
        Box::pin(async {})
    }
}

fn not_implemented<'a>(client: Client, msg: Envelope) -> HandlerFuture<'a> {
    Box::pin(async move {
        tracing::debug!(msg_type = %msg.type_name, "no handler installed");
        client.send(&Response::error("not implemented"));
    })
}
