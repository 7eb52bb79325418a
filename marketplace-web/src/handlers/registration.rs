use anyhow::anyhow;
use askama::Template;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
    Form,
};
use marketplace_client::models::{
    AgreementsStep, BasicsStep, BusinessStep, ContactStep, DetailsStep, DocumentsStep,
    RegistrationDraft, StepInput, WizardStep,
};
use marketplace_client::services::RegistrationError;
use marketplace_core::error::AppError;
use std::collections::{BTreeMap, HashMap};
use tower_sessions::Session;
use validator::ValidationErrors;

use crate::models::{AuthUser, StepField, UserView};
use crate::AppState;

/// Prefix of the hidden inputs carrying fields read from a scanned
/// document.
const EXTRACTED_PREFIX: &str = "extracted.";

pub struct StepLink {
    pub slug: &'static str,
    pub number: usize,
    pub reachable: bool,
    pub current: bool,
}

#[derive(Template)]
#[template(path = "registration.html")]
pub struct RegistrationTemplate {
    pub app_name: &'static str,
    pub user: UserView,
    pub step: WizardStep,
    pub steps: Vec<StepLink>,
    pub fields: Vec<StepField>,
    pub previous: Option<WizardStep>,
    pub summary: Vec<(String, String)>,
    pub scan_enabled: bool,
    pub error: Option<String>,
}

impl RegistrationTemplate {
    pub fn is_review(&self) -> bool {
        self.step == WizardStep::Review
    }

    pub fn is_documents(&self) -> bool {
        self.step == WizardStep::Documents
    }
}

fn to_app_error(err: RegistrationError) -> AppError {
    match err {
        RegistrationError::Validation(errors) => AppError::ValidationError(errors),
        RegistrationError::NotSupported(role) => {
            AppError::NotFound(anyhow!("the {} app has no registration", role))
        }
        RegistrationError::Profile(err) => AppError::BadGateway(err.to_string()),
        other => AppError::InternalError(anyhow!(other)),
    }
}

fn parse_step(slug: &str) -> Result<WizardStep, AppError> {
    slug.parse()
        .map_err(|e: String| AppError::NotFound(anyhow!(e)))
}

fn step_path(step: WizardStep) -> String {
    format!("/registration/{}", step)
}

/// Resume at the furthest step reached.
pub async fn registration_start(
    State(state): State<AppState>,
    session: Session,
    auth_user: AuthUser,
) -> Result<Redirect, AppError> {
    let wizard = state.wizard(session).map_err(to_app_error)?;
    let draft = wizard
        .resume(auth_user.user_id())
        .await
        .map_err(to_app_error)?;
    Ok(Redirect::to(&step_path(draft.current_step)))
}

pub async fn registration_step(
    State(state): State<AppState>,
    session: Session,
    auth_user: AuthUser,
    Path(slug): Path<String>,
) -> Result<Response, AppError> {
    let step = parse_step(&slug)?;
    let wizard = state.wizard(session).map_err(to_app_error)?;

    match wizard.visit(auth_user.user_id(), step).await {
        Ok(draft) => Ok(render(&state, &auth_user, step, &draft, None, None).into_response()),
        Err(RegistrationError::StepLocked { current, .. }) => {
            Ok(Redirect::to(&step_path(current)).into_response())
        }
        Err(err) => Err(to_app_error(err)),
    }
}

pub async fn registration_save(
    State(state): State<AppState>,
    session: Session,
    auth_user: AuthUser,
    Path(slug): Path<String>,
    Form(form): Form<HashMap<String, String>>,
) -> Result<Response, AppError> {
    let step = parse_step(&slug)?;
    let Some(input) = step_input(step, &form) else {
        return Ok(Redirect::to(&step_path(step)).into_response());
    };
    let wizard = state.wizard(session).map_err(to_app_error)?;

    match wizard.save_step(auth_user.user_id(), input).await {
        Ok(draft) => {
            let next = step
                .next()
                .filter(|next| *next <= draft.current_step)
                .unwrap_or(draft.current_step);
            Ok(Redirect::to(&step_path(next)).into_response())
        }
        Err(RegistrationError::Validation(errors)) => {
            let draft = wizard
                .resume(auth_user.user_id())
                .await
                .map_err(to_app_error)?;
            let page = render(&state, &auth_user, step, &draft, Some(&form), Some(&errors));
            Ok((StatusCode::UNPROCESSABLE_ENTITY, page).into_response())
        }
        Err(RegistrationError::StepLocked { current, .. }) => {
            Ok(Redirect::to(&step_path(current)).into_response())
        }
        Err(err) => Err(to_app_error(err)),
    }
}

pub async fn registration_submit(
    State(state): State<AppState>,
    session: Session,
    auth_user: AuthUser,
) -> Result<Response, AppError> {
    let wizard = state.wizard(session).map_err(to_app_error)?;

    match wizard.submit(&auth_user.session).await {
        Ok(profile) => {
            tracing::info!(user_id = %profile.user_id, "Profile registered");
            Ok(Redirect::to("/").into_response())
        }
        Err(RegistrationError::Incomplete(step)) => {
            Ok(Redirect::to(&step_path(step)).into_response())
        }
        Err(RegistrationError::Profile(err)) => {
            tracing::error!(error = %err, "Registration submit failed");
            let draft = wizard
                .resume(auth_user.user_id())
                .await
                .map_err(to_app_error)?;
            let mut page = render(&state, &auth_user, WizardStep::Review, &draft, None, None);
            page.error = Some("We could not save your profile. Try again shortly.".to_string());
            Ok((StatusCode::BAD_GATEWAY, page).into_response())
        }
        Err(err) => Err(to_app_error(err)),
    }
}

fn render(
    state: &AppState,
    auth_user: &AuthUser,
    step: WizardStep,
    draft: &RegistrationDraft,
    submitted: Option<&HashMap<String, String>>,
    errors: Option<&ValidationErrors>,
) -> RegistrationTemplate {
    let mut fields = step_fields(step, draft);
    for field in fields.iter_mut() {
        if let Some(form) = submitted {
            if field.input_type == "checkbox" {
                field.value = form.contains_key(field.name).to_string();
            } else if let Some(value) = form.get(field.name) {
                field.value = value.clone();
            }
        }
        field.error = errors.and_then(|errors| field_error(errors, field.name));
    }

    RegistrationTemplate {
        app_name: state.app_name(),
        user: UserView::from(&auth_user.session.principal),
        step,
        steps: WizardStep::ALL
            .iter()
            .map(|s| StepLink {
                slug: s.slug(),
                number: s.number(),
                reachable: *s <= draft.current_step,
                current: *s == step,
            })
            .collect(),
        fields,
        previous: step.previous(),
        summary: if step == WizardStep::Review {
            summary(draft)
        } else {
            Vec::new()
        },
        scan_enabled: state.ocr.is_some(),
        error: None,
    }
}

fn field_error(errors: &ValidationErrors, name: &str) -> Option<String> {
    let field_errors = errors.field_errors();
    let first = field_errors
        .iter()
        .find(|(field, _)| field.to_string() == name)
        .and_then(|(_, errs)| errs.first())?;
    let message = match &*first.code {
        "email" => "Enter a valid email address",
        "url" => "Enter a full address starting with https://",
        "length" => "Check the length of this field",
        "must_accept" => "Required to continue",
        _ => "Check this field",
    };
    Some(message.to_string())
}

/// Inputs for a step, prefilled from the draft.
fn step_fields(step: WizardStep, draft: &RegistrationDraft) -> Vec<StepField> {
    match step {
        WizardStep::Basics => {
            let basics = draft.basics.as_ref();
            vec![
                StepField::new("name", "Business name", "text")
                    .value(basics.map(|b| b.name.clone()).unwrap_or_default()),
                StepField::new("category", "Category", "text")
                    .optional()
                    .value(basics.and_then(|b| b.category.clone()).unwrap_or_default()),
            ]
        }
        WizardStep::Contact => {
            let contact = draft.contact.as_ref();
            vec![
                StepField::new("contact_name", "Contact person", "text")
                    .value(contact.map(|c| c.contact_name.clone()).unwrap_or_default()),
                StepField::new("email", "Contact email", "email")
                    .value(contact.map(|c| c.email.clone()).unwrap_or_default()),
                StepField::new("phone", "Phone", "tel")
                    .value(contact.map(|c| c.phone.clone()).unwrap_or_default()),
            ]
        }
        WizardStep::Business => {
            let business = draft.business.as_ref();
            vec![
                StepField::new("business_number", "Business registration number", "text")
                    .value(business.map(|b| b.business_number.clone()).unwrap_or_default()),
                StepField::new("website", "Website", "url")
                    .optional()
                    .value(business.and_then(|b| b.website.clone()).unwrap_or_default()),
            ]
        }
        WizardStep::Documents => vec![StepField::new(
            "business_document_url",
            "Business registration certificate",
            "url",
        )
        .value(
            draft
                .documents
                .as_ref()
                .map(|d| d.business_document_url.clone())
                .unwrap_or_default(),
        )],
        WizardStep::Details => {
            let details = draft.details.as_ref();
            vec![
                StepField::new("description", "Description", "textarea")
                    .value(details.map(|d| d.description.clone()).unwrap_or_default()),
                StepField::new("avatar_url", "Logo URL", "url")
                    .optional()
                    .value(details.and_then(|d| d.avatar_url.clone()).unwrap_or_default()),
            ]
        }
        WizardStep::Agreements => {
            let agreements = draft.agreements.as_ref();
            let checked = |accepted: Option<bool>| accepted.unwrap_or(false).to_string();
            vec![
                StepField::new("accept_terms", "I accept the terms of service", "checkbox")
                    .value(checked(agreements.map(|a| a.accept_terms))),
                StepField::new("accept_privacy", "I accept the privacy policy", "checkbox")
                    .value(checked(agreements.map(|a| a.accept_privacy))),
            ]
        }
        WizardStep::Review => Vec::new(),
    }
}

fn summary(draft: &RegistrationDraft) -> Vec<(String, String)> {
    let mut rows = Vec::new();
    let mut push = |label: &str, value: Option<&String>| {
        if let Some(value) = value.filter(|v| !v.is_empty()) {
            rows.push((label.to_string(), value.clone()));
        }
    };
    if let Some(basics) = &draft.basics {
        push("Business name", Some(&basics.name));
        push("Category", basics.category.as_ref());
    }
    if let Some(contact) = &draft.contact {
        push("Contact person", Some(&contact.contact_name));
        push("Contact email", Some(&contact.email));
        push("Phone", Some(&contact.phone));
    }
    if let Some(business) = &draft.business {
        push("Business number", Some(&business.business_number));
        push("Website", business.website.as_ref());
    }
    if let Some(documents) = &draft.documents {
        push("Certificate", Some(&documents.business_document_url));
        for (field, value) in &documents.extracted {
            push(&field.replace('_', " "), Some(value));
        }
    }
    if let Some(details) = &draft.details {
        push("Description", Some(&details.description));
        push("Logo", details.avatar_url.as_ref());
    }
    rows
}

/// Build the step payload from submitted form fields. `None` for the
/// review step, which has no inputs.
fn step_input(step: WizardStep, form: &HashMap<String, String>) -> Option<StepInput> {
    let text = |key: &str| form.get(key).map(|v| v.trim().to_string()).unwrap_or_default();
    let optional = |key: &str| {
        form.get(key)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    };
    // Unchecked boxes are not submitted at all.
    let checked = |key: &str| form.get(key).is_some_and(|v| v == "on" || v == "true");

    let input = match step {
        WizardStep::Basics => StepInput::Basics(BasicsStep {
            name: text("name"),
            category: optional("category"),
        }),
        WizardStep::Contact => StepInput::Contact(ContactStep {
            contact_name: text("contact_name"),
            email: text("email"),
            phone: text("phone"),
        }),
        WizardStep::Business => StepInput::Business(BusinessStep {
            business_number: text("business_number"),
            website: optional("website"),
        }),
        WizardStep::Documents => StepInput::Documents(DocumentsStep {
            business_document_url: text("business_document_url"),
            extracted: form
                .iter()
                .filter_map(|(key, value)| {
                    key.strip_prefix(EXTRACTED_PREFIX)
                        .filter(|_| !value.trim().is_empty())
                        .map(|field| (field.to_string(), value.trim().to_string()))
                })
                .collect::<BTreeMap<_, _>>(),
        }),
        WizardStep::Details => StepInput::Details(DetailsStep {
            description: text("description"),
            avatar_url: optional("avatar_url"),
        }),
        WizardStep::Agreements => StepInput::Agreements(AgreementsStep {
            accept_terms: checked("accept_terms"),
            accept_privacy: checked("accept_privacy"),
        }),
        WizardStep::Review => return None,
    };
    Some(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn form(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn blank_optional_fields_become_none() {
        let input = step_input(
            WizardStep::Basics,
            &form(&[("name", "  Night Market Co "), ("category", "")]),
        );
        assert_eq!(
            input,
            Some(StepInput::Basics(BasicsStep {
                name: "Night Market Co".into(),
                category: None,
            }))
        );
    }

    #[test]
    fn missing_checkbox_is_unchecked() {
        let input = step_input(WizardStep::Agreements, &form(&[("accept_terms", "on")]));
        assert_eq!(
            input,
            Some(StepInput::Agreements(AgreementsStep {
                accept_terms: true,
                accept_privacy: false,
            }))
        );
    }

    #[test]
    fn extracted_fields_are_collected() {
        let input = step_input(
            WizardStep::Documents,
            &form(&[
                ("business_document_url", "https://cdn.example.com/doc.png"),
                ("extracted.business_number", "123-45-67890"),
                ("extracted.address", " "),
            ]),
        );
        let Some(StepInput::Documents(documents)) = input else {
            panic!("expected documents input");
        };
        assert_eq!(documents.extracted.len(), 1);
        assert_eq!(documents.extracted["business_number"], "123-45-67890");
    }

    #[test]
    fn review_has_no_input() {
        assert_eq!(step_input(WizardStep::Review, &HashMap::new()), None);
    }
}
