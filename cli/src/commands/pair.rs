use clap::{Args, ValueEnum};
use uuid::Uuid;

use tutor_core::model::InterventionIntent;
use tutor_core::policy::HelpRequest;

use crate::util::{Daemon, exit_error};

#[derive(Clone, Copy, ValueEnum)]
pub enum IntentArg {
    Hint,
    Review,
    Stuck,
    Next,
    Explain,
    Escalate,
}

impl From<IntentArg> for InterventionIntent {
    fn from(arg: IntentArg) -> Self {
        match arg {
            IntentArg::Hint => InterventionIntent::Hint,
            IntentArg::Review => InterventionIntent::Review,
            IntentArg::Stuck => InterventionIntent::Stuck,
            IntentArg::Next => InterventionIntent::Next,
            IntentArg::Explain => InterventionIntent::Explain,
            IntentArg::Escalate => InterventionIntent::Escalate,
        }
    }
}

#[derive(Args)]
pub struct PairArgs {
    /// Kind of help
    #[arg(value_enum)]
    pub intent: IntentArg,
    /// Session id
    pub id: Uuid,
    /// Help level 0-5 (escalation needs 4 or 5)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=5))]
    pub level: Option<u8>,
    /// Why a near-complete answer is needed (escalation)
    #[arg(long)]
    pub justification: Option<String>,
    /// Question for the tutor
    #[arg(long, short = 'q')]
    pub question: Option<String>,
    /// Run the request refers to
    #[arg(long)]
    pub run_id: Option<Uuid>,
    /// Model provider override
    #[arg(long)]
    pub provider: Option<String>,
    /// Print the answer as it is generated
    #[arg(long)]
    pub stream: bool,
}

impl PairArgs {
    fn help_request(&self) -> HelpRequest {
        HelpRequest {
            level: self.level,
            justification: self.justification.clone(),
            run_id: self.run_id,
            provider: self.provider.clone(),
            question: self.question.clone(),
        }
    }
}

pub async fn run(daemon: &Daemon, args: PairArgs) -> i32 {
    let intent = InterventionIntent::from(args.intent);
    let body = match serde_json::to_value(args.help_request()) {
        Ok(v) => v,
        Err(e) => exit_error(&format!("Failed to encode request: {e}"), None),
    };
    let path = format!("/v1/sessions/{}/{}", args.id, intent.as_str());
    if args.stream {
        daemon.stream(&path, body).await
    } else {
        daemon.post(&path, Some(body)).await
    }
}
