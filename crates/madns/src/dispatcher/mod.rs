//! Per-query orchestration: policy lookup, action selection and notifications.

mod upstream;
pub use upstream::{
    forward, ForwardError, NetworkExchange, UpstreamExchange, MAX_RETRIES, UPSTREAM_TIMEOUT,
};

use std::net::SocketAddr;

use hickory_proto::op::{Message, ResponseCode};
use madns_common::{to_fqdn, PolicyModel, Transport};

use crate::matcher::{find_policy, MatchedPolicy};
use crate::notifier::Notification;
use crate::synthesizer::synthesize;
use crate::{encode_message, get_response_message, render_message, RebindStore};

/// Inbound query metadata, lives as long as a single dispatch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryContext {
    /// Lowercase FQDN of the first question
    pub qname: String,
    pub transport: Transport,
    pub client: SocketAddr,
}

impl QueryContext {
    /// Returns `None` for messages without a question
    pub fn new(request: &Message, client: SocketAddr, transport: Transport) -> Option<Self> {
        let question = request.queries().first()?;
        Some(QueryContext {
            qname: to_fqdn(&question.name().to_ascii()),
            transport,
            client,
        })
    }
}

/// A reply ready to be sent to the client
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub message: Message,
    /// Whether names may be compressed when encoding
    pub compress: bool,
}

impl Reply {
    fn new(message: Message) -> Self {
        Reply {
            message,
            compress: false,
        }
    }

    fn compressed(message: Message) -> Self {
        Reply {
            message,
            compress: true,
        }
    }

    pub fn encode(&self) -> anyhow::Result<Vec<u8>> {
        encode_message(&self.message, self.compress)
    }
}

/// Result of a dispatch.
///
/// Notifications are meant to be handed to a notifier after the reply has been sent.
#[derive(Debug, Clone, PartialEq)]
pub struct Outcome {
    pub reply: Reply,
    pub notifications: Vec<Notification>,
}

impl Outcome {
    fn reply_only(reply: Reply) -> Self {
        Outcome {
            reply,
            notifications: Vec::new(),
        }
    }
}

pub struct Dispatcher<E = NetworkExchange> {
    policies: PolicyModel,
    rebind: RebindStore,
    exchange: E,
}

impl<E: UpstreamExchange> Dispatcher<E> {
    pub fn new(policies: PolicyModel, exchange: E) -> Self {
        Dispatcher {
            policies,
            rebind: RebindStore::new(),
            exchange,
        }
    }

    pub fn rebind_store(&self) -> &RebindStore {
        &self.rebind
    }

    pub async fn handle(&self, request: &Message, client: SocketAddr, transport: Transport) -> Outcome {
        let Some(context) = QueryContext::new(request, client, transport) else {
            tracing::debug!(%client, "request without a question");
            return Outcome::reply_only(Reply::new(get_response_message(
                request,
                ResponseCode::FormErr,
            )));
        };

        let Some(matched) = find_policy(&self.policies, &context.qname) else {
            tracing::warn!("no handler for domain: {}", context.qname);
            return Outcome::reply_only(Reply::new(get_response_message(
                request,
                ResponseCode::ServFail,
            )));
        };

        let reply = self.run_action(request, &context, matched).await;
        let notifications = notifications_for(&context, request, matched);

        Outcome {
            reply,
            notifications,
        }
    }

    async fn run_action(
        &self,
        request: &Message,
        context: &QueryContext,
        matched: MatchedPolicy<'_>,
    ) -> Reply {
        let policy = matched.policy;

        if let Some(upstream) = policy.redirect() {
            tracing::info!(upstream, "redirecting using protocol: {}", context.transport);
            return match forward(&self.exchange, request, upstream, context.transport).await {
                Ok(response) => Reply::compressed(response),
                Err(e) => {
                    tracing::warn!("failure to forward request: {:#}", anyhow::Error::from(e));
                    Reply::new(get_response_message(request, ResponseCode::ServFail))
                }
            };
        }

        if let Some(literal) = policy.respond() {
            return Reply::new(respond_with(request, literal));
        }

        if let Some(addrs) = policy.rebind_addrs() {
            let idx = self.rebind.next_index(matched.key, addrs.len());
            tracing::debug!(key = matched.key, idx, "rebind answer selected");
            return Reply::new(respond_with(request, &addrs[idx]));
        }

        // Notification-only policy
        Reply::new(get_response_message(request, ResponseCode::NoError))
    }
}

/// Answers every question of `request` with the same literal
fn respond_with(request: &Message, literal: &str) -> Message {
    let mut response = get_response_message(request, ResponseCode::NoError);
    for query in request.queries() {
        tracing::info!("Responding to {} with {}", query.name(), literal);
        if let Some(record) = synthesize(query.name(), literal) {
            response.add_answer(record);
        }
    }
    response
}

pub fn render_notification_body(context: &QueryContext, request: &Message) -> String {
    format!(
        "source: {}\nproto: {}\nrequest:\n{}\n\n",
        context.client,
        context.transport,
        render_message(request)
    )
}

fn notifications_for(
    context: &QueryContext,
    request: &Message,
    matched: MatchedPolicy<'_>,
) -> Vec<Notification> {
    let email = matched.policy.notify_email();
    let slack = matched.policy.notify_slack();
    if email.is_none() && slack.is_none() {
        return Vec::new();
    }

    let body = render_notification_body(context, request);
    email
        .map(|destination| Notification::email(destination, body.clone()))
        .into_iter()
        .chain(slack.map(|destination| Notification::slack(destination, body.clone())))
        .collect()
}
