use anyhow::anyhow;
use askama::Template;
use axum::{
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use marketplace_client::services::SignUpOutcome;
use marketplace_client::{AppRole, AuthError, AuthInput, ProviderError};
use marketplace_core::error::AppError;
use serde::Deserialize;
use tower_sessions::Session;
use validator::Validate;

use crate::handlers::app::render_transition;
use crate::services::metrics::record_auth_outcome;
use crate::{AppState, CALLBACK_PATH};

#[derive(Template)]
#[template(path = "login.html")]
pub struct LoginTemplate {
    pub app_name: &'static str,
    pub oauth_providers: Vec<String>,
    pub can_register: bool,
}

#[derive(Template)]
#[template(path = "register.html")]
pub struct RegisterTemplate {
    pub app_name: &'static str,
}

/// Inline message swapped into a form by htmx.
#[derive(Template)]
#[template(path = "partials/form_message.html")]
pub struct FormMessage {
    pub success: bool,
    pub message: String,
}

impl FormMessage {
    fn error(message: impl Into<String>) -> Response {
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            FormMessage {
                success: false,
                message: message.into(),
            },
        )
            .into_response()
    }

    fn success(message: impl Into<String>) -> Response {
        FormMessage {
            success: true,
            message: message.into(),
        }
        .into_response()
    }
}

#[derive(Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 8, message = "Use at least 8 characters"))]
    pub password: String,
    #[validate(must_match(other = "password", message = "Passwords do not match"))]
    pub password_confirm: String,
}

#[derive(Deserialize, Validate)]
pub struct MagicLinkRequest {
    #[validate(email)]
    pub email: String,
}

/// Fragment parameters relayed by the callback script; the server never
/// sees a URL fragment otherwise.
#[derive(Deserialize)]
pub struct FragmentRelay {
    pub fragment: String,
    /// Path and query the fragment was found on.
    #[serde(default)]
    pub path: Option<String>,
}

fn hx_redirect(to: &'static str) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert("HX-Redirect", HeaderValue::from_static(to));
    (StatusCode::OK, headers, "").into_response()
}

fn first_validation_message(errors: &validator::ValidationErrors) -> String {
    errors
        .field_errors()
        .into_iter()
        .flat_map(|(field, errs)| errs.iter().map(move |e| (field.to_string(), e)))
        .map(|(field, e)| match &e.message {
            Some(message) => message.to_string(),
            None => format!("Check the {} field", field.replace('_', " ")),
        })
        .next()
        .unwrap_or_else(|| "Check the form and try again".to_string())
}

pub async fn login_page(State(state): State<AppState>) -> impl IntoResponse {
    LoginTemplate {
        app_name: state.app_name(),
        oauth_providers: state.oauth_providers.as_ref().clone(),
        can_register: state.role != AppRole::Admin,
    }
}

pub async fn register_page(State(state): State<AppState>) -> Result<RegisterTemplate, AppError> {
    if state.role == AppRole::Admin {
        return Err(AppError::NotFound(anyhow!("admin accounts are invited")));
    }
    Ok(RegisterTemplate {
        app_name: state.app_name(),
    })
}

pub async fn login_handler(
    State(state): State<AppState>,
    session: Session,
    Form(payload): Form<LoginRequest>,
) -> Response {
    if payload.validate().is_err() {
        return FormMessage::error("Invalid email or password");
    }

    let controller = state.controller(session);
    match controller
        .sign_in_with_password(&payload.email, &payload.password)
        .await
    {
        Ok(transition) => {
            record_auth_outcome(state.role, &transition.state);
            tracing::info!(state = transition.state.name(), "Password sign-in");
            hx_redirect("/")
        }
        Err(AuthError::Provider(ProviderError::Rejected { status: 409, .. })) => {
            FormMessage::error("A sign-in is already in progress. Try again in a moment.")
        }
        Err(err) => {
            tracing::warn!(error = %err, "Password sign-in failed");
            FormMessage::error("Invalid email or password")
        }
    }
}

pub async fn register_handler(
    State(state): State<AppState>,
    session: Session,
    Form(payload): Form<RegisterRequest>,
) -> Response {
    if state.role == AppRole::Admin {
        return FormMessage::error("Admin accounts are invited");
    }
    if let Err(errors) = payload.validate() {
        return FormMessage::error(first_validation_message(&errors));
    }

    let callback = state.callback_url();
    let controller = state.controller(session);
    match controller
        .sign_up(&payload.email, &payload.password, Some(&callback))
        .await
    {
        Ok(SignUpOutcome::SignedIn(_)) => {
            record_auth_outcome(state.role, &controller.state());
            hx_redirect("/")
        }
        Ok(SignUpOutcome::ConfirmationPending { email }) => FormMessage::success(format!(
            "We sent a confirmation link to {}. Open it to finish signing up.",
            email
        )),
        Err(err) => {
            tracing::warn!(error = %err, "Sign-up failed");
            FormMessage::error(err.to_string())
        }
    }
}

pub async fn magic_link_handler(
    State(state): State<AppState>,
    session: Session,
    Form(payload): Form<MagicLinkRequest>,
) -> Response {
    if payload.validate().is_err() {
        return FormMessage::error("Enter a valid email address");
    }

    let callback = state.callback_url();
    match state
        .controller(session)
        .send_magic_link(&payload.email, Some(&callback))
        .await
    {
        Ok(()) => FormMessage::success("Check your email for a sign-in link."),
        Err(err) => {
            tracing::warn!(error = %err, "Magic link request failed");
            FormMessage::error("We could not send a sign-in link. Try again shortly.")
        }
    }
}

/// Start a third-party sign-in.
pub async fn oauth_handler(
    State(state): State<AppState>,
    session: Session,
    Path(provider): Path<String>,
) -> Result<Redirect, AppError> {
    if !state.oauth_providers.iter().any(|p| p == &provider) {
        return Err(AppError::NotFound(anyhow!(
            "unknown sign-in provider '{}'",
            provider
        )));
    }

    let callback = state.callback_url();
    let authorize = state
        .controller(session)
        .sign_in_with_oauth(&provider, &callback)
        .await
        .map_err(|err| AppError::BadGateway(err.to_string()))?;

    tracing::info!(%provider, "Redirecting to sign-in provider");
    Ok(Redirect::to(authorize.as_str()))
}

/// Handle grant parameters that arrived in a URL fragment.
pub async fn fragment_handler(
    State(state): State<AppState>,
    session: Session,
    Form(relay): Form<FragmentRelay>,
) -> Response {
    // Only same-origin paths; anything else falls back to the callback.
    let path = relay
        .path
        .as_deref()
        .filter(|p| p.starts_with('/') && !p.starts_with("//"))
        .unwrap_or(CALLBACK_PATH);
    let mut page = match state.site_url.join(path) {
        Ok(page) => page,
        Err(_) => return AppError::BadRequest(anyhow!("invalid path")).into_response(),
    };
    page.set_fragment(Some(relay.fragment.trim_start_matches('#')));

    let transition = state
        .controller(session.clone())
        .dispatch(AuthInput::PageLoad(page))
        .await;
    render_transition(&state, &session, transition).await
}

pub async fn logout_handler(State(state): State<AppState>, session: Session) -> Response {
    let transition = state.controller(session).sign_out().await;
    record_auth_outcome(state.role, &transition.state);
    tracing::info!("Signed out");
    hx_redirect("/")
}
