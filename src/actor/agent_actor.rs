// actor/agent_actor.rs - Agent Actor

use actix::prelude::*;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::oneshot;
use tracing::{debug, error, info, instrument, warn};

use crate::actor::behaviour::{Agent, AgentContext};
use crate::actor::messages::*;
use crate::actor::AgentCell;
use crate::error::AgentError;
use crate::observability::{record_handler_failure, record_message_handling, record_message_received};

/// Actor wrapping one agent behaviour.
///
/// The actix mailbox is the agent's mailbox: `Deliver` is enqueued with
/// `do_send` and handled one at a time, so a handler never runs
/// concurrently with itself and self-posts land behind the current message.
pub struct AgentActor {
    /// Runtime view handed to the behaviour
    context: AgentContext,

    /// User logic
    behaviour: Box<dyn Agent>,

    /// Lifecycle state shared with the manager and router
    cell: Arc<AgentCell>,

    /// Fires once the handle is visible in the registry
    attached: Option<oneshot::Receiver<()>>,
}

impl AgentActor {
    pub fn new(context: AgentContext, behaviour: Box<dyn Agent>, cell: Arc<AgentCell>) -> Self {
        Self {
            context,
            behaviour,
            cell,
            attached: None,
        }
    }

    /// Hold `on_start` and the mailbox until `attached` fires, so the agent
    /// can address itself from `on_start`
    pub fn wait_for_attach(mut self, attached: oneshot::Receiver<()>) -> Self {
        self.attached = Some(attached);
        self
    }

    fn run_on_start(&mut self) {
        let _ = self.guarded("start", |agent, ctx| {
            agent.on_start(ctx);
            Ok(())
        });
    }

    /// Run a behaviour callback, turning errors and panics into `HandlerFailure`
    fn guarded<F>(&mut self, stage: &str, f: F) -> Result<(), AgentError>
    where
        F: FnOnce(&mut dyn Agent, &AgentContext) -> anyhow::Result<()>,
    {
        let behaviour = &mut self.behaviour;
        let context = &self.context;
        let outcome = catch_unwind(AssertUnwindSafe(|| f(behaviour.as_mut(), context)));

        let failure = match outcome {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{e:#}"),
            Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
        };

        let failure = AgentError::HandlerFailure {
            aid: self.context.aid().clone(),
            reason: failure,
        };
        error!(stage, error = %failure, "Handler failure");
        record_handler_failure(self.context.aid().class_name());
        Err(failure)
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

impl Actor for AgentActor {
    type Context = Context<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("Agent {} starting", self.context.aid());

        match self.attached.take() {
            Some(attached) => {
                // wait() holds back the mailbox as well
                ctx.wait(attached.into_actor(self).map(|_, act, _| act.run_on_start()));
            }
            None => self.run_on_start(),
        }
    }

    fn stopping(&mut self, _ctx: &mut Self::Context) -> Running {
        info!("Agent {} stopping", self.context.aid());
        self.cell.stop();

        let _ = self.guarded("stop", |agent, ctx| {
            agent.on_stop(ctx);
            Ok(())
        });

        Running::Stop
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        debug!(
            agent = %self.context.aid(),
            processed = self.cell.messages_processed(),
            dropped = self.cell.messages_dropped(),
            "Agent stopped"
        );
    }
}

// =============================================================================
// Message Handlers
// =============================================================================

impl Handler<Deliver> for AgentActor {
    type Result = ();

    #[instrument(skip(self, msg, _ctx), fields(agent = %self.context.aid()))]
    fn handle(&mut self, msg: Deliver, _ctx: &mut Self::Context) {
        if !self.cell.begin_processing() {
            // at-most-once on stop: pending mail is discarded
            debug!(message_id = msg.message.message_id(), "Dropping message for stopped agent");
            self.cell.record_dropped();
            return;
        }

        if msg.message.is_expired() {
            debug!(message_id = msg.message.message_id(), "Delivering message past its reply-by deadline");
        }

        let performative = msg.message.performative().to_string();
        record_message_received(&performative);

        let started = Instant::now();
        let message = msg.message;
        let result = self.guarded("message", move |agent, ctx| agent.on_message(ctx, message));
        record_message_handling(started.elapsed(), &performative);
        self.cell.finish_processing(result.is_ok());
    }
}

impl Handler<Shutdown> for AgentActor {
    type Result = ();

    fn handle(&mut self, msg: Shutdown, ctx: &mut Self::Context) {
        if msg.reason != ShutdownReason::Requested {
            warn!("Agent {} shutting down: {:?}", self.context.aid(), msg.reason);
        } else {
            info!("Agent {} shutdown requested", self.context.aid());
        }
        self.cell.stop();
        ctx.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acl_message::{AclMessage, Performative};
    use crate::aid::Aid;
    use std::sync::Weak;

    struct Touchy;

    impl Agent for Touchy {
        fn on_message(&mut self, _ctx: &AgentContext, msg: AclMessage) -> anyhow::Result<()> {
            match msg.text() {
                Some("panic") => panic!("boom"),
                Some("fail") => anyhow::bail!("refused"),
                _ => Ok(()),
            }
        }
    }

    fn actor() -> AgentActor {
        let context = AgentContext::new(Aid::new("touchy", "m"), "n1".into(), Weak::new());
        AgentActor::new(context, Box::new(Touchy), Arc::new(AgentCell::new()))
    }

    fn deliver(actor: &mut AgentActor, text: &str) -> Result<(), AgentError> {
        let msg = AclMessage::new(Performative::Inform).with_content(text);
        actor.guarded("message", move |agent, ctx| agent.on_message(ctx, msg))
    }

    #[test]
    fn test_handler_errors_become_handler_failures() {
        let mut actor = actor();
        assert!(deliver(&mut actor, "fine").is_ok());

        match deliver(&mut actor, "fail") {
            Err(AgentError::HandlerFailure { aid, reason }) => {
                assert_eq!(aid, Aid::new("touchy", "m"));
                assert_eq!(reason, "refused");
            }
            other => panic!("unexpected: {other:?}"),
        }

        match deliver(&mut actor, "panic") {
            Err(AgentError::HandlerFailure { reason, .. }) => assert_eq!(reason, "panicked: boom"),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
