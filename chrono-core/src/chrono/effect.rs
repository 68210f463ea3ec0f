//! Effect Implementation
//!
//! An Effect is a side-effecting step a calculation asks for in the middle of
//! a propagation pass: a confirmation prompt, a lookup in an external system,
//! anything the pure calculation cannot do by itself.
//!
//! # How Effects Work
//!
//! 1. A calculation returns `Computation::Effect(effect, continuation)`.
//!
//! 2. The pass suspends and hands an `EffectRequest` to the caller.
//!
//! 3. The caller's resolver answers with a `Resolution`:
//!    - `Resume(value)` feeds `value` to the continuation
//!    - `Reject(reason)` aborts the whole pass
//!
//! # Resolvers
//!
//! - `AcceptAll` resumes every effect with `true` and is the default.
//! - Any `FnMut(&EffectRequest) -> Resolution` is a synchronous resolver.
//! - `effect_channel` forwards requests to another task over tokio channels
//!   for use with the async propagation driver.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::graph::NodeId;

/// A side-effecting step requested by a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Effect {
    /// What kind of effect this is, e.g. `"confirm"`.
    pub kind: String,

    /// Effect-specific data for the resolver.
    #[serde(default)]
    pub payload: Value,
}

impl Effect {
    /// Create an effect with the given kind and payload.
    pub fn new(kind: impl Into<String>, payload: Value) -> Self {
        Self {
            kind: kind.into(),
            payload,
        }
    }
}

/// An effect waiting for resolution, with enough context to identify it.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectRequest {
    /// The calculation node that asked for the effect.
    pub node: NodeId,

    /// Diagnostic label of that node.
    pub label: String,

    /// How many effects this node already had resolved in the current pass.
    pub round: usize,

    pub effect: Effect,
}

/// The answer to an effect request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Continue the calculation with this value.
    Resume(Value),

    /// Abort the pass.
    Reject(String),
}

/// Resolves effects synchronously.
pub trait EffectResolver {
    fn resolve(&mut self, request: &EffectRequest) -> Resolution;
}

impl<F> EffectResolver for F
where
    F: FnMut(&EffectRequest) -> Resolution,
{
    fn resolve(&mut self, request: &EffectRequest) -> Resolution {
        self(request)
    }
}

/// Resumes every effect with `true`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAll;

impl EffectResolver for AcceptAll {
    fn resolve(&mut self, _request: &EffectRequest) -> Resolution {
        Resolution::Resume(Value::Bool(true))
    }
}

/// An effect handed to another task, with the channel to answer on.
#[derive(Debug)]
pub struct PendingEffect {
    pub request: EffectRequest,
    reply: oneshot::Sender<Resolution>,
}

impl PendingEffect {
    /// Answer the request. Dropping a `PendingEffect` unanswered rejects it.
    pub fn resolve(self, resolution: Resolution) {
        // The pass may have been dropped in the meantime; nothing to do then.
        let _ = self.reply.send(resolution);
    }
}

/// Sending half of an effect channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ChannelResolver {
    sender: mpsc::Sender<PendingEffect>,
}

impl ChannelResolver {
    /// Forward `request` and wait for the answer.
    ///
    /// A closed inbox or an unanswered request resolves to a rejection.
    pub fn resolve(
        &self,
        request: EffectRequest,
    ) -> impl std::future::Future<Output = Resolution> + Send + 'static {
        let sender = self.sender.clone();
        async move {
            let (reply, answer) = oneshot::channel();
            if sender.send(PendingEffect { request, reply }).await.is_err() {
                return Resolution::Reject("effect inbox closed".into());
            }
            answer
                .await
                .unwrap_or_else(|_| Resolution::Reject("effect dropped without resolution".into()))
        }
    }
}

/// Receiving half of an effect channel.
#[derive(Debug)]
pub struct EffectInbox {
    receiver: mpsc::Receiver<PendingEffect>,
}

impl EffectInbox {
    /// Wait for the next pending effect. `None` once every resolver is gone.
    pub async fn recv(&mut self) -> Option<PendingEffect> {
        self.receiver.recv().await
    }
}

/// Create a resolver/inbox pair buffering up to `buffer` requests.
pub fn effect_channel(buffer: usize) -> (ChannelResolver, EffectInbox) {
    let (sender, receiver) = mpsc::channel(buffer.max(1));
    (ChannelResolver { sender }, EffectInbox { receiver })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn request() -> EffectRequest {
        EffectRequest {
            node: NodeId::from(7),
            label: "confirm-total".into(),
            round: 0,
            effect: Effect::new("confirm", json!({"total": 10})),
        }
    }

    #[test]
    fn accept_all_resumes_with_true() {
        assert_eq!(AcceptAll.resolve(&request()), Resolution::Resume(json!(true)));
    }

    #[test]
    fn closures_are_resolvers() {
        let mut seen = Vec::new();
        let mut resolver = |request: &EffectRequest| {
            seen.push(request.effect.kind.clone());
            Resolution::Reject("no".into())
        };
        assert_eq!(resolver.resolve(&request()), Resolution::Reject("no".into()));
        assert_eq!(seen, vec!["confirm".to_string()]);
    }

    #[test]
    fn effect_payload_defaults_to_null() {
        let effect: Effect = serde_json::from_str(r#"{"kind": "ping"}"#).unwrap();
        assert_eq!(effect, Effect::new("ping", Value::Null));
    }

    #[tokio::test]
    async fn channel_round_trip() {
        let (resolver, mut inbox) = effect_channel(4);

        let answering = tokio::spawn(async move {
            let pending = inbox.recv().await.expect("request");
            assert_eq!(pending.request.effect.kind, "confirm");
            pending.resolve(Resolution::Resume(json!(42)));
        });

        assert_eq!(resolver.resolve(request()).await, Resolution::Resume(json!(42)));
        answering.await.unwrap();
    }

    #[tokio::test]
    async fn dropped_request_rejects() {
        let (resolver, mut inbox) = effect_channel(1);

        let dropping = tokio::spawn(async move {
            let pending = inbox.recv().await.expect("request");
            drop(pending);
        });

        assert!(matches!(
            resolver.resolve(request()).await,
            Resolution::Reject(_)
        ));
        dropping.await.unwrap();
    }

    #[tokio::test]
    async fn closed_inbox_rejects() {
        let (resolver, inbox) = effect_channel(1);
        drop(inbox);
        assert!(matches!(
            resolver.resolve(request()).await,
            Resolution::Reject(_)
        ));
    }
}
