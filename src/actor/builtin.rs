// actor/builtin.rs - Built-in Agent Behaviours

use tracing::info;

use crate::acl_message::{AclMessage, Performative};
use crate::actor::behaviour::{Agent, AgentContext, InitArgs};
use crate::actor::catalog::AgentCatalog;

/// Module the built-in classes are registered under
pub const BUILTIN_MODULE: &str = "builtin";

/// Answers every REQUEST / QUERY_REF with an INFORM carrying the same content.
///
/// Init args: `prefix` (optional) is prepended to the echoed text.
pub struct EchoAgent {
    prefix: String,
}

impl EchoAgent {
    pub fn new(args: &InitArgs) -> Self {
        Self {
            prefix: args.get("prefix").cloned().unwrap_or_default(),
        }
    }
}

impl Agent for EchoAgent {
    fn on_message(&mut self, ctx: &AgentContext, msg: AclMessage) -> anyhow::Result<()> {
        match msg.performative() {
            Performative::Request | Performative::QueryRef => {
                let text = msg.text().unwrap_or_default();
                let report = ctx.reply(&msg, Performative::Inform, format!("{}{}", self.prefix, text))?;
                if !report.all_succeeded() {
                    anyhow::bail!("echo reply not delivered: {:?}", report.failures());
                }
            }
            other => {
                info!(agent = %ctx.aid(), performative = %other, "Echo ignoring message");
            }
        }
        Ok(())
    }
}

/// Logs every message it receives
#[derive(Default)]
pub struct LogAgent {
    seen: u64,
}

impl Agent for LogAgent {
    fn on_start(&mut self, ctx: &AgentContext) {
        info!(agent = %ctx.aid(), node = %ctx.node_id(), "Log agent ready");
    }

    fn on_message(&mut self, ctx: &AgentContext, msg: AclMessage) -> anyhow::Result<()> {
        self.seen += 1;
        info!(
            agent = %ctx.aid(),
            seen = self.seen,
            performative = %msg.performative(),
            from = %msg.sender().map(ToString::to_string).unwrap_or_else(|| "unknown".into()),
            content = msg.text().unwrap_or("<structured>"),
            "Message received"
        );
        Ok(())
    }
}

/// Register the built-in classes
pub fn register_builtins(catalog: &AgentCatalog) {
    catalog.register(BUILTIN_MODULE, "Echo", |args: &InitArgs| {
        Ok(Box::new(EchoAgent::new(args)) as Box<dyn Agent>)
    });
    catalog.register(BUILTIN_MODULE, "Log", |_args: &InitArgs| {
        Ok(Box::new(LogAgent::default()) as Box<dyn Agent>)
    });
}
