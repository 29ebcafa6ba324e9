use std::{path::PathBuf, sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::db::SurrealDbClient,
    utils::{
        config::AppConfig,
        deadline::{ensure_active, with_timeout},
        embedding::EmbeddingProvider,
    },
};
use ingestion_pipeline::{IngestReport, IngestionPipeline};
use retrieval_pipeline::answer::{self, Answer};
use state_machines::{core::GuardError, state_machine};
use tokio_util::sync::CancellationToken;

state_machine! {
    name: OrchestratorMachine,
    state: OrchestratorState,
    initial: Idle,
    states: [Idle, Ingesting, Answering, Failed],
    events {
        ingest { transition: { from: Idle, to: Ingesting } }
        answer { transition: { from: Idle, to: Answering } }
        finish {
            transition: { from: Ingesting, to: Idle }
            transition: { from: Answering, to: Idle }
        }
        abort {
            transition: { from: Idle, to: Failed }
            transition: { from: Ingesting, to: Failed }
            transition: { from: Answering, to: Failed }
        }
    }
}

fn idle() -> OrchestratorMachine<(), Idle> {
    OrchestratorMachine::new(())
}

/// The two operations the pipeline exposes, as a tagged request.
#[derive(Debug, Clone)]
pub enum PipelineRequest {
    Ingest { path: PathBuf },
    Answer { question: String },
}

#[derive(Debug)]
pub enum PipelineOutcome {
    Ingested(IngestReport),
    Answered(Answer),
}

/// Drives one request at a time through the ingest or answer sequence.
/// External calls run under the configured per-call timeout, and the
/// cancellation token is consulted before each call; a failed sub-step
/// aborts the whole operation.
pub struct Orchestrator {
    db: Arc<SurrealDbClient>,
    embedding_provider: Arc<EmbeddingProvider>,
    llm_client: Arc<Client<OpenAIConfig>>,
    ingestion: IngestionPipeline,
    query_model: String,
    top_k: usize,
    call_timeout: Duration,
}

impl Orchestrator {
    pub fn new(
        db: Arc<SurrealDbClient>,
        embedding_provider: Arc<EmbeddingProvider>,
        llm_client: Arc<Client<OpenAIConfig>>,
        config: &AppConfig,
    ) -> Self {
        let ingestion =
            IngestionPipeline::new(Arc::clone(&db), Arc::clone(&embedding_provider), config);
        Self {
            db,
            embedding_provider,
            llm_client,
            ingestion,
            query_model: config.query_model.clone(),
            top_k: config.retrieval_top_k,
            call_timeout: Duration::from_secs(config.request_timeout_secs),
        }
    }

    pub async fn execute(
        &self,
        request: PipelineRequest,
        cancel: &CancellationToken,
    ) -> Result<PipelineOutcome, AppError> {
        let machine = idle();

        match request {
            PipelineRequest::Ingest { path } => {
                let machine = machine
                    .ingest()
                    .map_err(|(_, guard)| map_guard_error("ingest", &guard))?;
                let report = self.ingestion.ingest_path(&path, cancel).await?;
                let _machine = machine
                    .finish()
                    .map_err(|(_, guard)| map_guard_error("finish", &guard))?;
                Ok(PipelineOutcome::Ingested(report))
            }
            PipelineRequest::Answer { question } => {
                let machine = machine
                    .answer()
                    .map_err(|(_, guard)| map_guard_error("answer", &guard))?;
                let answer = self.answer_question(&question, cancel).await?;
                let _machine = machine
                    .finish()
                    .map_err(|(_, guard)| map_guard_error("finish", &guard))?;
                Ok(PipelineOutcome::Answered(answer))
            }
        }
    }

    async fn answer_question(
        &self,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer, AppError> {
        let question = question.trim();
        if question.is_empty() {
            return Err(AppError::Validation("question must not be empty".into()));
        }

        let chunks = retrieval_pipeline::retrieve(
            &self.db,
            &self.embedding_provider,
            question,
            self.top_k,
            self.call_timeout,
            cancel,
        )
        .await?;

        ensure_active(cancel, "answer generation")?;
        with_timeout(
            "answer generation",
            self.call_timeout,
            answer::generate(&self.llm_client, &self.query_model, question, &chunks),
        )
        .await
    }
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid orchestrator transition during {event}: {guard:?}"
    ))
}
