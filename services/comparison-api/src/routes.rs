use std::collections::BTreeMap;

use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::http::StatusCode;
use actix_web::{web, HttpResponse, ResponseError};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared::error::AppError;
use shared::export::{build_export, export_file_name};
use shared::indicator::{Category, Indicator};
use shared::openai_client::{OpenAiSettings, PromptError};
use shared::proposal::{EntryValue, IndicatorEntry, Proposal, ProposalStatus, SourceKind};
use shared::scoring::ScoringOptions;
use shared::state::{Action, Evaluation, StateStore, WizardState, WizardStep};
use shared::weight_advisor::suggest_weights;
use shared::weights::{WeightAuditEntry, WeightConfig, WeightSuggestion};
use tracing::{error, info, warn};

pub struct AppState {
    pub store: StateStore,
    pub http: reqwest::Client,
    pub openai: OpenAiSettings,
}

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] AppError);

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match &self.0 {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Ai(PromptError::MissingApiKey) => StatusCode::BAD_REQUEST,
            AppError::Ai(_) => StatusCode::BAD_GATEWAY,
            AppError::Schema(_) | AppError::Io(_) | AppError::Serde(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        HttpResponse::build(status).json(ErrorResponse { error: self.0.to_string() })
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn proposal_not_found(id: &str) -> ApiError {
    AppError::NotFound(format!("proposal '{id}'")).into()
}

async fn health() -> HttpResponse {
    HttpResponse::Ok().body("OK")
}

async fn get_state(data: web::Data<AppState>) -> web::Json<WizardState> {
    web::Json(data.store.snapshot().await)
}

#[derive(Deserialize)]
struct StepInput {
    step: WizardStep,
}

#[derive(Serialize)]
struct StepView {
    step: WizardStep,
    number: u8,
}

async fn set_step(data: web::Data<AppState>, web::Json(input): web::Json<StepInput>) -> ApiResult<web::Json<StepView>> {
    let state = data.store.dispatch(Action::SetStep(input.step)).await?;
    Ok(web::Json(StepView {
        step: state.step,
        number: state.step.number(),
    }))
}

/* ------------------------------ indicators ------------------------------ */

#[derive(Serialize)]
struct IndicatorsView {
    categories: Vec<Category>,
    indicators: Vec<Indicator>,
    selected: Vec<String>,
    warnings: Vec<String>,
}

async fn list_indicators(data: web::Data<AppState>) -> web::Json<IndicatorsView> {
    let state = data.store.snapshot().await;
    let registry = state.registry();
    let warnings = registry.integrity_warnings();
    web::Json(IndicatorsView {
        categories: registry.categories,
        indicators: registry.indicators,
        selected: state.selected_indicators,
        warnings,
    })
}

async fn add_indicator(data: web::Data<AppState>, web::Json(indicator): web::Json<Indicator>) -> ApiResult<HttpResponse> {
    let id = indicator.id.clone();
    let state = data.store.dispatch(Action::AddCustomIndicator(indicator)).await?;
    let created = state
        .custom_indicators
        .iter()
        .find(|i| i.id == id)
        .cloned()
        .ok_or_else(|| AppError::NotFound(format!("indicator '{id}'")))?;
    info!(indicator = %id, "custom indicator added");
    Ok(HttpResponse::Created().json(created))
}

/* ------------------------------ proposals ------------------------------- */

#[derive(Deserialize)]
struct ListQuery {
    #[serde(default)]
    include_hidden: bool,
}

async fn list_proposals(data: web::Data<AppState>, query: web::Query<ListQuery>) -> web::Json<Vec<Proposal>> {
    let state = data.store.snapshot().await;
    web::Json(
        state
            .proposals
            .into_iter()
            .filter(|p| query.include_hidden || !p.hidden)
            .collect(),
    )
}

#[derive(Deserialize)]
struct NewProposal {
    name: String,
    #[serde(default)]
    status: Option<ProposalStatus>,
    #[serde(default)]
    data: BTreeMap<String, IndicatorEntry>,
}

async fn create_proposal(data: web::Data<AppState>, web::Json(input): web::Json<NewProposal>) -> ApiResult<HttpResponse> {
    let mut proposal = Proposal::new(input.name);
    if let Some(status) = input.status {
        proposal.set_status(status);
    }
    for (indicator_id, entry) in input.data {
        proposal.set_value(indicator_id, entry);
    }
    let created = proposal.clone();
    data.store.dispatch(Action::AddProposal(proposal)).await?;
    info!(proposal = %created.id, name = %created.name, "proposal added");
    Ok(HttpResponse::Created().json(created))
}

fn proposal_view(state: &WizardState, id: &str) -> ApiResult<web::Json<Proposal>> {
    state
        .proposal(id)
        .cloned()
        .map(web::Json)
        .ok_or_else(|| proposal_not_found(id))
}

#[derive(Deserialize)]
struct StatusInput {
    status: ProposalStatus,
}

async fn set_status(
    data: web::Data<AppState>,
    path: web::Path<String>,
    web::Json(input): web::Json<StatusInput>,
) -> ApiResult<web::Json<Proposal>> {
    let proposal_id = path.into_inner();
    let state = data
        .store
        .dispatch(Action::SetProposalStatus {
            proposal_id: proposal_id.clone(),
            status: input.status,
        })
        .await?;
    proposal_view(&state, &proposal_id)
}

#[derive(Deserialize)]
struct ValueInput {
    #[serde(default)]
    value: EntryValue,
    #[serde(default)]
    source: Option<SourceKind>,
}

async fn set_value(
    data: web::Data<AppState>,
    path: web::Path<(String, String)>,
    web::Json(input): web::Json<ValueInput>,
) -> ApiResult<web::Json<Proposal>> {
    let (proposal_id, indicator_id) = path.into_inner();
    let entry = IndicatorEntry::new(input.value, input.source.unwrap_or(SourceKind::Manual));
    let state = data
        .store
        .dispatch(Action::SetIndicatorValue {
            proposal_id: proposal_id.clone(),
            indicator_id,
            entry,
        })
        .await?;
    proposal_view(&state, &proposal_id)
}

#[derive(Deserialize)]
struct HideInput {
    hidden: bool,
}

/// Hides the proposal unless the body says `{"hidden": false}`.
async fn hide_proposal(
    data: web::Data<AppState>,
    path: web::Path<String>,
    body: Option<web::Json<HideInput>>,
) -> ApiResult<web::Json<Proposal>> {
    let proposal_id = path.into_inner();
    let hidden = body.map(|b| b.hidden).unwrap_or(true);
    let state = data
        .store
        .dispatch(Action::HideProposal {
            proposal_id: proposal_id.clone(),
            hidden,
        })
        .await?;
    proposal_view(&state, &proposal_id)
}

/* ------------------------------ selection ------------------------------- */

#[derive(Deserialize)]
struct SelectionInput {
    #[serde(default)]
    proposals: Option<Vec<String>>,
    #[serde(default)]
    indicators: Option<Vec<String>>,
}

#[derive(Serialize)]
struct SelectionView {
    proposals: Vec<String>,
    indicators: Vec<String>,
}

async fn set_selection(
    data: web::Data<AppState>,
    web::Json(input): web::Json<SelectionInput>,
) -> ApiResult<web::Json<SelectionView>> {
    if let Some(ids) = input.proposals {
        data.store.dispatch(Action::SelectProposals(ids)).await?;
    }
    if let Some(ids) = input.indicators {
        data.store.dispatch(Action::SelectIndicators(ids)).await?;
    }
    let state = data.store.snapshot().await;
    Ok(web::Json(SelectionView {
        proposals: state.selected_proposals,
        indicators: state.selected_indicators,
    }))
}

/* ------------------------------- weights -------------------------------- */

#[derive(Serialize)]
struct WeightsView {
    weights: WeightConfig,
    category_sum: f64,
    warning: Option<String>,
}

fn weights_view(state: &WizardState) -> WeightsView {
    WeightsView {
        weights: state.weights.clone(),
        category_sum: state.weights.category_sum(),
        warning: state.weights.category_sum_warning(),
    }
}

async fn get_weights(data: web::Data<AppState>) -> web::Json<WeightsView> {
    web::Json(weights_view(&data.store.snapshot().await))
}

#[derive(Deserialize)]
struct WeightsInput {
    #[serde(default)]
    indicators: BTreeMap<String, f64>,
    #[serde(default)]
    categories: BTreeMap<String, f64>,
}

async fn set_weights(
    data: web::Data<AppState>,
    web::Json(input): web::Json<WeightsInput>,
) -> ApiResult<web::Json<WeightsView>> {
    for (category_id, weight) in input.categories {
        data.store
            .dispatch(Action::SetCategoryWeight { category_id, weight })
            .await?;
    }
    for (indicator_id, weight) in input.indicators {
        data.store
            .dispatch(Action::SetIndicatorWeight { indicator_id, weight })
            .await?;
    }
    Ok(web::Json(weights_view(&data.store.snapshot().await)))
}

async fn reset_weights(data: web::Data<AppState>) -> ApiResult<web::Json<WeightsView>> {
    let state = data.store.dispatch(Action::ResetWeights).await?;
    Ok(web::Json(weights_view(&state)))
}

#[derive(Deserialize)]
struct SuggestQuery {
    #[serde(default = "default_apply")]
    apply: bool,
}

fn default_apply() -> bool {
    true
}

#[derive(Serialize)]
struct SuggestionView {
    suggestion: WeightSuggestion,
    applied: bool,
    weights: WeightsView,
}

async fn suggest(data: web::Data<AppState>, query: web::Query<SuggestQuery>) -> ApiResult<web::Json<SuggestionView>> {
    let state = data.store.snapshot().await;
    let registry = state.registry();
    let indicators = state.comparison_indicators();
    let proposals = state.comparison_proposals();

    let suggestion = suggest_weights(&data.http, &data.openai, &registry, &indicators, &proposals)
        .await
        .map_err(AppError::from)?;
    if suggestion.is_empty() {
        warn!("weight suggestion contained no usable weights");
    }

    let applied = query.apply && !suggestion.is_empty();
    let state = if applied {
        data.store
            .dispatch(Action::ApplySuggestion(suggestion.clone()))
            .await?
    } else {
        state
    };
    Ok(web::Json(SuggestionView {
        suggestion,
        applied,
        weights: weights_view(&state),
    }))
}

async fn audit_log(data: web::Data<AppState>) -> web::Json<Vec<WeightAuditEntry>> {
    web::Json(data.store.snapshot().await.audit_log)
}

/* ------------------------------ evaluation ------------------------------ */

async fn set_options(
    data: web::Data<AppState>,
    web::Json(options): web::Json<ScoringOptions>,
) -> ApiResult<web::Json<ScoringOptions>> {
    let state = data.store.dispatch(Action::SetOptions(options)).await?;
    Ok(web::Json(state.options))
}

async fn evaluate(data: web::Data<AppState>) -> ApiResult<web::Json<Evaluation>> {
    let state = data.store.dispatch(Action::Evaluate).await?;
    let evaluation = state
        .results
        .ok_or_else(|| AppError::NotFound("evaluation".into()))?;
    info!(
        proposals = evaluation.ranking.len(),
        warnings = evaluation.warnings.len(),
        "evaluation computed"
    );
    Ok(web::Json(evaluation))
}

async fn results(data: web::Data<AppState>) -> ApiResult<web::Json<Evaluation>> {
    data.store
        .snapshot()
        .await
        .results
        .map(web::Json)
        .ok_or_else(|| AppError::NotFound("no evaluation yet, POST /evaluate first".into()).into())
}

async fn export(data: web::Data<AppState>) -> HttpResponse {
    let state = data.store.snapshot().await;
    let document = build_export(&state);
    HttpResponse::Ok()
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(export_file_name(Utc::now()))],
        })
        .json(document)
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(health))
        .route("/state", web::get().to(get_state))
        .route("/step", web::put().to(set_step))
        .service(
            web::resource("/indicators")
                .route(web::get().to(list_indicators))
                .route(web::post().to(add_indicator)),
        )
        .service(
            web::resource("/proposals")
                .route(web::get().to(list_proposals))
                .route(web::post().to(create_proposal)),
        )
        .route("/proposals/{id}/status", web::put().to(set_status))
        .route("/proposals/{id}/values/{indicator_id}", web::put().to(set_value))
        .route("/proposals/{id}/hide", web::post().to(hide_proposal))
        .route("/selection", web::put().to(set_selection))
        .service(
            web::resource("/weights")
                .route(web::get().to(get_weights))
                .route(web::put().to(set_weights)),
        )
        .route("/weights/reset", web::post().to(reset_weights))
        .route("/weights/suggest", web::post().to(suggest))
        .route("/weights/audit", web::get().to(audit_log))
        .route("/options", web::put().to(set_options))
        .route("/evaluate", web::post().to(evaluate))
        .route("/results", web::get().to(results))
        .route("/export", web::get().to(export));
}
