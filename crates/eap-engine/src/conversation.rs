//! One EAP conversation: the methods still to be offered and their state
//!
//! The engine runs the outer conversation; PEAP runs a second one inside
//! its tunnel. Both go through [`Conversation::step`].

use crate::methods::{MethodCall, MethodTable};
use crate::state::{MethodContext, MethodState, Status};
use eap_proto::{EapCode, EapPacket, EapType};
use rand::Rng;
use std::collections::{HashMap, VecDeque};
use tracing::{debug, info, warn};

/// What the conversation wants sent after one inbound packet
#[derive(Debug)]
pub enum Step {
    Reply(EapPacket),
    Done(Status),
}

#[derive(Debug, Clone)]
pub struct Conversation {
    pending: VecDeque<EapType>,
    states: HashMap<EapType, MethodState>,
    /// Identifier of the last request sent
    last_identifier: Option<u8>,
}

impl Conversation {
    pub fn new(method_priority: Vec<EapType>) -> Self {
        Conversation {
            pending: method_priority.into(),
            states: HashMap::new(),
            last_identifier: None,
        }
    }

    pub fn current(&self) -> Option<EapType> {
        self.pending.front().copied()
    }

    pub fn pending(&self) -> impl Iterator<Item = &EapType> {
        self.pending.iter()
    }

    pub fn last_identifier(&self) -> Option<u8> {
        self.last_identifier
    }

    /// Apply a method's status to the pending list
    ///
    /// Returns the overall status once the exchange is over. `Error` always
    /// ends it; `Success` ends it when no method is left; `NextProtocol`
    /// never does.
    pub fn advance(&mut self, status: Status) -> Option<Status> {
        match status {
            Status::Unknown => None,
            Status::NextProtocol => {
                self.pop();
                None
            }
            Status::Error => {
                self.pop();
                Some(Status::Error)
            }
            Status::Success => {
                self.pop();
                self.pending.is_empty().then_some(Status::Success)
            }
        }
    }

    fn pop(&mut self) {
        if let Some(method) = self.pending.pop_front() {
            self.states.remove(&method);
        }
    }

    /// Handle one inbound response, or start the conversation when `inbound`
    /// is `None`
    pub async fn step(
        &mut self,
        table: &MethodTable,
        inbound: Option<&EapPacket>,
        context: &mut MethodContext,
    ) -> Step {
        let mut packet = inbound;

        if let Some(response) = packet {
            if response.code != EapCode::Response {
                warn!(session = %context.token, code = ?response.code, "Expected an EAP response");
                return Step::Done(Status::Error);
            }
            if let Some(last) = self.last_identifier
                && response.identifier != last
            {
                warn!(
                    session = %context.token,
                    identifier = response.identifier,
                    expected = last,
                    "EAP identifier mismatch"
                );
                return Step::Done(Status::Error);
            }
        }

        let identifier = match packet {
            Some(response) => response.identifier.wrapping_add(1),
            None => self
                .last_identifier
                .map(|id| id.wrapping_add(1))
                .unwrap_or_else(|| rand::rng().random()),
        };

        loop {
            let Some(current) = self.current() else {
                warn!(session = %context.token, "No method left to conclude the exchange");
                return Step::Done(Status::Error);
            };

            let method = match packet.and_then(|p| p.method_type) {
                Some(EapType::Nak) => EapType::Nak,
                Some(inbound) if table.routes_to(current, inbound) => current,
                Some(inbound) => {
                    warn!(
                        session = %context.token,
                        method = %current,
                        inbound = %inbound,
                        "Response for a method that was not offered"
                    );
                    return Step::Done(Status::Error);
                }
                None if packet.is_some() => {
                    warn!(session = %context.token, method = %current, "Response without a type");
                    return Step::Done(Status::Error);
                }
                None => current,
            };

            let Some(handler) = table.get(method) else {
                warn!(session = %context.token, method = %method, "No handler registered");
                return Step::Done(Status::Error);
            };

            let call = MethodCall {
                packet,
                identifier,
                state: self.states.remove(&method),
                context: &mut *context,
            };
            let result = match handler.handle(call).await {
                Ok(result) => result,
                Err(e) => {
                    warn!(session = %context.token, method = %method, error = %e, "EAP method failed");
                    return Step::Done(Status::Error);
                }
            };

            if let Some(state) = result.state {
                self.states.insert(method, state);
            }

            if result.status == Status::Unknown {
                return match result.reply {
                    Some(reply) => {
                        self.last_identifier = Some(reply.identifier);
                        Step::Reply(reply)
                    }
                    None => {
                        warn!(session = %context.token, method = %method, "Method produced no reply");
                        Step::Done(Status::Error)
                    }
                };
            }

            debug!(session = %context.token, method = %method, status = ?result.status, "Method concluded");
            if let Some(outcome) = self.advance(result.status) {
                info!(session = %context.token, status = ?outcome, "EAP conversation finished");
                return Step::Done(outcome);
            }

            // The next method starts without an inbound packet
            packet = None;
        }
    }
}
