use std::convert::Infallible;

use log::debug;
use serde::Serialize;
use warp::filters::body::BodyDeserializeError;
use warp::reply::Response;
use warp::{http::StatusCode, reply, Filter, Rejection, Reply};

use super::types::{ApiError, ApiFailure, PublishRequest, UpgradeRequest};
use crate::actor::Actor;
use crate::admin_inspector::AdminInspector;
use crate::error_handling::types::InstanceError;
use crate::instance_management::InstanceService;
use crate::preflight::PreflightService;
use crate::template_management::types::{NewTemplate, TemplatePatch};
use crate::template_management::TemplateService;

const MAX_BODY_BYTES: u64 = 64 * 1024;

pub fn with_state<T: Clone + Send>(
    state: T,
) -> impl Filter<Extract = (T,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Builds the caller from the identity headers set upstream. No user id
/// means an anonymous request.
pub fn actor_from_headers(
    user_id: Option<String>,
    role: Option<String>,
    host: Option<String>,
) -> Option<Actor> {
    let user_id = user_id.filter(|u| !u.trim().is_empty())?;
    let is_admin = role
        .map(|r| r.trim().eq_ignore_ascii_case("admin"))
        .unwrap_or(false);
    let actor = if is_admin {
        Actor::admin(user_id)
    } else {
        Actor::user(user_id)
    };
    Some(actor.with_request_host(host))
}

fn caller() -> impl Filter<Extract = (Option<Actor>,), Error = Rejection> + Clone {
    warp::header::optional::<String>("x-user-id")
        .and(warp::header::optional::<String>("x-user-role"))
        .and(warp::header::optional::<String>("host"))
        .map(actor_from_headers)
}

pub fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    reply::with_status(
        reply::json(&ApiError {
            message: message.into(),
        }),
        status,
    )
    .into_response()
}

/// JSON body on success, `ApiError` with the error's status otherwise.
pub fn respond<T: Serialize, E: ApiFailure>(result: Result<T, E>, success: StatusCode) -> Response {
    match result {
        Ok(body) => reply::with_status(reply::json(&body), success).into_response(),
        Err(e) => {
            let status = StatusCode::from_u16(e.kind().status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            debug!("Request failed with {}: {}", status, e);
            error_response(status, e.to_string())
        }
    }
}

fn authenticated(actor: Option<Actor>) -> Result<Actor, Response> {
    actor.ok_or_else(|| error_response(StatusCode::UNAUTHORIZED, "Missing x-user-id header"))
}

fn administrator(actor: Option<Actor>) -> Result<Actor, Response> {
    let actor = authenticated(actor)?;
    if actor.is_admin() {
        Ok(actor)
    } else {
        Err(error_response(
            StatusCode::FORBIDDEN,
            InstanceError::AdminRequired.to_string(),
        ))
    }
}

/// GET /templates
pub fn catalog_route(
    templates: TemplateService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("templates")
        .and(warp::get())
        .and(with_state(templates))
        .and_then(|templates: TemplateService| async move {
            Ok::<_, Rejection>(respond(templates.catalog().await, StatusCode::OK))
        })
}

/// POST /templates/:id/activate
pub fn activate_route(
    instances: InstanceService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("templates" / String / "activate")
        .and(warp::post())
        .and(caller())
        .and(with_state(instances))
        .and_then(
            |template_id: String, actor: Option<Actor>, instances: InstanceService| async move {
                let actor = match authenticated(actor) {
                    Ok(actor) => actor,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                Ok(respond(
                    instances.activate(&template_id, &actor).await,
                    StatusCode::OK,
                ))
            },
        )
}

/// GET /instances
pub fn list_instances_route(
    instances: InstanceService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("instances")
        .and(warp::get())
        .and(caller())
        .and(with_state(instances))
        .and_then(|actor: Option<Actor>, instances: InstanceService| async move {
            let actor = match authenticated(actor) {
                Ok(actor) => actor,
                Err(response) => return Ok::<_, Rejection>(response),
            };
            Ok(respond(
                instances.list_for_user(&actor.user_id).await,
                StatusCode::OK,
            ))
        })
}

/// POST /instances/:id/upgrade
pub fn upgrade_route(
    instances: InstanceService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("instances" / String / "upgrade")
        .and(warp::post())
        .and(caller())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<UpgradeRequest>())
        .and(with_state(instances))
        .and_then(
            |instance_id: String,
             actor: Option<Actor>,
             request: UpgradeRequest,
             instances: InstanceService| async move {
                let actor = match authenticated(actor) {
                    Ok(actor) => actor,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                let result = instances
                    .upgrade(
                        &instance_id,
                        request.target_template_id.as_deref(),
                        request.strategy,
                        &actor,
                    )
                    .await;
                Ok(respond(result, StatusCode::OK))
            },
        )
}

/// POST /instances/:id/{deactivate,restart,destroy}
pub fn instance_action_route(
    instances: InstanceService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("instances" / String / String)
        .and(warp::post())
        .and(caller())
        .and(with_state(instances))
        .and_then(
            |instance_id: String,
             action: String,
             actor: Option<Actor>,
             instances: InstanceService| async move {
                let actor = match authenticated(actor) {
                    Ok(actor) => actor,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                let result = match action.as_str() {
                    "deactivate" => instances.deactivate(&instance_id, &actor).await,
                    "restart" => instances.restart(&instance_id, &actor).await,
                    "destroy" => instances.destroy(&instance_id, &actor).await,
                    _ => return Err(warp::reject::not_found()),
                };
                Ok(respond(result, StatusCode::OK))
            },
        )
}

/// POST /admin/templates
pub fn create_template_route(
    templates: TemplateService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("admin" / "templates")
        .and(warp::post())
        .and(caller())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<NewTemplate>())
        .and(with_state(templates))
        .and_then(
            |actor: Option<Actor>, input: NewTemplate, templates: TemplateService| async move {
                let admin = match administrator(actor) {
                    Ok(admin) => admin,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                Ok(respond(
                    templates.create_draft(input, &admin).await,
                    StatusCode::CREATED,
                ))
            },
        )
}

/// PUT /admin/templates/:id
pub fn update_template_route(
    templates: TemplateService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("admin" / "templates" / String)
        .and(warp::put())
        .and(caller())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<TemplatePatch>())
        .and(with_state(templates))
        .and_then(
            |template_id: String,
             actor: Option<Actor>,
             patch: TemplatePatch,
             templates: TemplateService| async move {
                let admin = match administrator(actor) {
                    Ok(admin) => admin,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                Ok(respond(
                    templates.update_draft(&template_id, patch, &admin).await,
                    StatusCode::OK,
                ))
            },
        )
}

/// POST /admin/templates/:id/publish
pub fn publish_template_route(
    templates: TemplateService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("admin" / "templates" / String / "publish")
        .and(warp::post())
        .and(caller())
        .and(warp::body::content_length_limit(MAX_BODY_BYTES))
        .and(warp::body::json::<PublishRequest>())
        .and(with_state(templates))
        .and_then(
            |template_id: String,
             actor: Option<Actor>,
             request: PublishRequest,
             templates: TemplateService| async move {
                let admin = match administrator(actor) {
                    Ok(admin) => admin,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                let result = templates
                    .publish(&template_id, &request.version, &request.notes, &admin)
                    .await;
                Ok(respond(result, StatusCode::OK))
            },
        )
}

/// POST /admin/templates/:id/archive
pub fn archive_template_route(
    templates: TemplateService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("admin" / "templates" / String / "archive")
        .and(warp::post())
        .and(caller())
        .and(with_state(templates))
        .and_then(
            |template_id: String, actor: Option<Actor>, templates: TemplateService| async move {
                let admin = match administrator(actor) {
                    Ok(admin) => admin,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                Ok::<_, Rejection>(respond(
                    templates.archive(&template_id, &admin).await,
                    StatusCode::OK,
                ))
            },
        )
}

/// GET /admin/instances
pub fn inspect_instances_route(
    inspector: AdminInspector,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("admin" / "instances")
        .and(warp::get())
        .and(caller())
        .and(with_state(inspector))
        .and_then(|actor: Option<Actor>, inspector: AdminInspector| async move {
            let admin = match authenticated(actor) {
                Ok(admin) => admin,
                Err(response) => return Ok::<_, Rejection>(response),
            };
            Ok(respond(inspector.list(&admin).await, StatusCode::OK))
        })
}

/// POST /admin/instances/:id/{stop,restart}
pub fn admin_action_route(
    instances: InstanceService,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("admin" / "instances" / String / String)
        .and(warp::post())
        .and(caller())
        .and(with_state(instances))
        .and_then(
            |instance_id: String,
             action: String,
             actor: Option<Actor>,
             instances: InstanceService| async move {
                let admin = match authenticated(actor) {
                    Ok(admin) => admin,
                    Err(response) => return Ok::<_, Rejection>(response),
                };
                let result = match action.as_str() {
                    "stop" => instances.force_stop(&instance_id, &admin).await,
                    "restart" => instances.force_restart(&instance_id, &admin).await,
                    _ => return Err(warp::reject::not_found()),
                };
                Ok(respond(result, StatusCode::OK))
            },
        )
}

/// GET /admin/preflight
pub fn preflight_route(
    preflight: std::sync::Arc<PreflightService>,
) -> impl Filter<Extract = impl Reply, Error = Rejection> + Clone {
    warp::path!("admin" / "preflight")
        .and(warp::get())
        .and(caller())
        .and(with_state(preflight))
        .and_then(
            |actor: Option<Actor>, preflight: std::sync::Arc<PreflightService>| async move {
                if let Err(response) = administrator(actor) {
                    return Ok::<_, Rejection>(response);
                }
                let report = preflight.report().await;
                let status = if report.ready {
                    StatusCode::OK
                } else {
                    StatusCode::SERVICE_UNAVAILABLE
                };
                Ok(reply::with_status(reply::json(&report), status).into_response())
            },
        )
}

/// Turns unmatched routes and malformed bodies into JSON errors.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.is_not_found() {
        return Ok(error_response(StatusCode::NOT_FOUND, "Not found"));
    }
    if let Some(e) = err.find::<BodyDeserializeError>() {
        return Ok(error_response(StatusCode::BAD_REQUEST, e.to_string()));
    }
    if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        return Ok(error_response(
            StatusCode::PAYLOAD_TOO_LARGE,
            "Request body too large",
        ));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_response(
            StatusCode::METHOD_NOT_ALLOWED,
            "Method not allowed",
        ));
    }
    debug!("Unhandled rejection: {:?}", err);
    Ok(error_response(
        StatusCode::INTERNAL_SERVER_ERROR,
        "Unhandled request",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error_handling::types::{PortError, TemplateError};

    #[test]
    fn test_headers_build_actor() {
        let actor = actor_from_headers(
            Some("alice".into()),
            Some("Admin".into()),
            Some("labs.example.test:8080".into()),
        )
        .unwrap();
        assert!(actor.is_admin());
        assert_eq!(actor.request_host.as_deref(), Some("labs.example.test:8080"));

        let actor = actor_from_headers(Some("bob".into()), None, None).unwrap();
        assert!(!actor.is_admin());

        assert!(actor_from_headers(None, Some("admin".into()), None).is_none());
        assert!(actor_from_headers(Some("  ".into()), None, None).is_none());
    }

    #[test]
    fn test_error_kinds_map_to_status() {
        let missing: Result<(), TemplateError> = Err(TemplateError::NotFound("t-1".into()));
        assert_eq!(respond(missing, StatusCode::OK).status(), StatusCode::NOT_FOUND);

        let exhausted: Result<(), InstanceError> = Err(PortError::Exhausted {
            start: 20000,
            end: 20001,
        }
        .into());
        assert_eq!(respond(exhausted, StatusCode::OK).status(), StatusCode::CONFLICT);

        let forbidden: Result<(), InstanceError> = Err(InstanceError::AdminRequired);
        assert_eq!(respond(forbidden, StatusCode::OK).status(), StatusCode::FORBIDDEN);

        let created: Result<&str, InstanceError> = Ok("ok");
        assert_eq!(respond(created, StatusCode::CREATED).status(), StatusCode::CREATED);
    }

    #[test]
    fn test_non_admin_is_refused_before_handlers() {
        assert_eq!(
            administrator(Some(Actor::user("alice"))).unwrap_err().status(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            administrator(None).unwrap_err().status(),
            StatusCode::UNAUTHORIZED
        );
        assert!(administrator(Some(Actor::admin("root"))).is_ok());
    }
}
