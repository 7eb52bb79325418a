use askama::Template;
use axum::{
    extract::State,
    http::{StatusCode, Uri},
    response::{IntoResponse, Redirect, Response},
};
use marketplace_client::{AppRole, AuthInput, AuthState, Outcome, Transition};
use tower_sessions::Session;

use crate::models::{ErrorView, UserView};
use crate::services::metrics::record_auth_outcome;
use crate::{local_path, AppState};

#[derive(Template)]
#[template(path = "home.html")]
pub struct HomeTemplate {
    pub app_name: &'static str,
    pub user: Option<UserView>,
    pub profile_name: Option<String>,
    /// Show the "finish your registration" prompt.
    pub registration_prompt: bool,
    pub notice: Option<&'static str>,
    pub can_register: bool,
}

#[derive(Template)]
#[template(path = "auth_error.html")]
pub struct AuthErrorTemplate {
    pub app_name: &'static str,
    pub error: ErrorView,
}

#[derive(Template)]
#[template(path = "loading.html")]
pub struct LoadingTemplate {
    pub app_name: &'static str,
}

/// Page bootstrap: handle any grant in the address, restore the stored
/// session and show where the visitor stands.
///
/// Also serves the redirect callback path.
#[tracing::instrument(skip_all, fields(path = %uri.path()))]
pub async fn index(State(state): State<AppState>, session: Session, uri: Uri) -> Response {
    if let Some(error) = ErrorView::take(&session).await {
        return error_page(&state, error);
    }

    let controller = state.controller(session.clone());
    let transition = controller
        .dispatch(AuthInput::PageLoad(state.page_url(&uri)))
        .await;
    render_transition(&state, &session, transition).await
}

/// Turn the result of a page load into a response. A cleaned address is
/// applied with a redirect, carrying any error across it.
pub async fn render_transition(
    state: &AppState,
    session: &Session,
    transition: Transition,
) -> Response {
    if !transition.skipped {
        record_auth_outcome(state.role, &transition.state);
    }

    if let Some(clean) = transition.replace_url.as_ref() {
        if let AuthState::Error(err) = &transition.state {
            ErrorView::from(err).stash(session).await;
        }
        return Redirect::to(&local_path(clean)).into_response();
    }

    match transition.state {
        AuthState::Error(err) => error_page(state, ErrorView::from(&err)),
        AuthState::Ready(outcome) => home(state, outcome),
        // Another request in this session is still exchanging a grant.
        other => {
            tracing::debug!(
                state = other.name(),
                loading = other.is_loading(),
                "Page load did not settle"
            );
            LoadingTemplate {
                app_name: state.app_name(),
            }
            .into_response()
        }
    }
}

fn home(state: &AppState, outcome: Outcome) -> Response {
    let mut page = HomeTemplate {
        app_name: state.app_name(),
        user: outcome.principal().map(UserView::from),
        profile_name: None,
        registration_prompt: false,
        notice: None,
        can_register: state.role != AppRole::Admin,
    };

    match outcome {
        Outcome::NoSession | Outcome::ProfileNotRequired { .. } => {}
        Outcome::ProfileMissing {
            registration_deferred,
            ..
        } => {
            if state.role == AppRole::Organizer && !registration_deferred {
                return Redirect::to("/registration").into_response();
            }
            page.registration_prompt = true;
            if state.role == AppRole::Exhibitor {
                page.notice = Some("We could not set up your store profile yet.");
            }
        }
        Outcome::ProfilePresent { profile, .. } => {
            page.registration_prompt = !profile.is_complete();
            page.profile_name = profile.name;
        }
    }

    page.into_response()
}

pub fn error_page(state: &AppState, error: ErrorView) -> Response {
    let status = match error.kind.as_str() {
        "timeout" => StatusCode::GATEWAY_TIMEOUT,
        "provider" => StatusCode::BAD_GATEWAY,
        "storage" => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::UNAUTHORIZED,
    };
    (
        status,
        AuthErrorTemplate {
            app_name: state.app_name(),
            error,
        },
    )
        .into_response()
}

/// "Return home" from the error page.
pub async fn reset(State(state): State<AppState>, session: Session) -> Redirect {
    state.controller(session).dispatch(AuthInput::Reset).await;
    Redirect::to("/")
}

pub async fn health_check() -> &'static str {
    "OK"
}
