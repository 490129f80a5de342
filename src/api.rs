// src/api.rs
use crate::auth::{self, Session, SessionSettings};
use crate::db::Database;
use crate::error::{AppError, Unauthenticated};
use crate::ledger;
use crate::models::{CashForm, LoginForm, QuoteForm, RegisterForm, TradeForm, UserId};
use crate::oracle::PriceOracle;
use crate::views;
use log::{debug, error, info, warn};
use std::convert::Infallible;
use std::sync::Arc;
use warp::http::header::{HeaderMap, HeaderValue, CACHE_CONTROL, EXPIRES, PRAGMA, SET_COOKIE};
use warp::http::{StatusCode, Uri};
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

const MAX_FORM_BYTES: u64 = 16 * 1024;

/// Everything a handler needs, shared by all requests.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub oracle: Arc<dyn PriceOracle>,
    pub session: Arc<SessionSettings>,
}

impl AppState {
    pub fn new(db: Database, oracle: Arc<dyn PriceOracle>, session: SessionSettings) -> Self {
        AppState {
            db,
            oracle,
            session: Arc::new(session),
        }
    }
}

pub fn routes(state: AppState) -> impl Filter<Extract = impl Reply, Error = Infallible> + Clone {
    let register_page = page("register").map(|| html(views::register()));
    let register = form_post("register")
        .and(with_state(state.clone()))
        .and(form::<RegisterForm>())
        .and_then(register_handler);

    let login_page = page("login").map(|| {
        with_cookie(html(views::login()), &auth::clear_session_cookie())
    });
    let login = form_post("login")
        .and(with_state(state.clone()))
        .and(form::<LoginForm>())
        .and_then(login_handler);

    let logout = page("logout")
        .and(warp::cookie::optional(auth::SESSION_COOKIE))
        .and(with_state(state.clone()))
        .then(logout_handler);

    let quote_page = page("quote")
        .and(with_user(state.clone()))
        .map(|_user: UserId| html(views::quote_form()));
    let quote = form_post("quote")
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<QuoteForm>())
        .and_then(quote_handler);

    let buy_page = page("buy")
        .and(with_user(state.clone()))
        .map(|_user: UserId| html(views::buy_form()));
    let buy = form_post("buy")
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<TradeForm>())
        .and_then(buy_handler);

    let sell_page = page("sell")
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(sell_page_handler);
    let sell = form_post("sell")
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<TradeForm>())
        .and_then(sell_handler);

    let cash_page = page("cash")
        .and(with_user(state.clone()))
        .map(|_user: UserId| html(views::cash_form()));
    let cash = form_post("cash")
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and(form::<CashForm>())
        .and_then(cash_handler);

    let index = warp::path::end()
        .and(warp::get())
        .and(with_user(state.clone()))
        .and(with_state(state.clone()))
        .and_then(index_handler);

    let history = page("history")
        .and(with_user(state.clone()))
        .and(with_state(state))
        .and_then(history_handler);

    let auth_routes = register_page
        .or(register)
        .unify()
        .or(login_page)
        .unify()
        .or(login)
        .unify()
        .or(logout)
        .unify()
        .boxed();

    let trade_routes = quote_page
        .or(quote)
        .unify()
        .or(buy_page)
        .unify()
        .or(buy)
        .unify()
        .or(sell_page)
        .unify()
        .or(sell)
        .unify()
        .or(cash_page)
        .unify()
        .or(cash)
        .unify()
        .boxed();

    let view_routes = index.or(history).unify().boxed();

    auth_routes
        .or(trade_routes)
        .unify()
        .or(view_routes)
        .unify()
        .recover(handle_rejection)
        .unify()
        .with(warp::reply::with::headers(no_cache_headers()))
        .with(warp::log("finance::access"))
}

fn page(name: &'static str) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::path(name).and(warp::path::end()).and(warp::get())
}

fn form_post(name: &'static str) -> impl Filter<Extract = (), Error = Rejection> + Clone {
    warp::path(name).and(warp::path::end()).and(warp::post())
}

fn form<T>() -> impl Filter<Extract = (T,), Error = Rejection> + Clone
where
    T: serde::de::DeserializeOwned + Send,
{
    warp::body::content_length_limit(MAX_FORM_BYTES).and(warp::body::form())
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

/// Resolves the session cookie to a user id, rejecting with
/// `Unauthenticated` when there is no valid session.
fn with_user(state: AppState) -> impl Filter<Extract = (UserId,), Error = Rejection> + Clone {
    warp::cookie::optional(auth::SESSION_COOKIE)
        .and(with_state(state))
        .and_then(|token: Option<String>, state: AppState| async move {
            let session = match token.and_then(|t| auth::verify_token(&t, &state.session)) {
                Some(session) => session,
                None => return Err(warp::reject::custom(Unauthenticated)),
            };
            match state.db.session_generation(session.user).await {
                Ok(Some(generation)) if generation == session.generation => Ok(session.user),
                Ok(Some(_)) => {
                    debug!("Retired session token for user {}", session.user);
                    Err(warp::reject::custom(Unauthenticated))
                }
                Ok(None) => {
                    warn!("Session for unknown user {}", session.user);
                    Err(warp::reject::custom(Unauthenticated))
                }
                Err(e) => Err(warp::reject::custom(e)),
            }
        })
}

fn html(body: String) -> Response {
    warp::reply::html(body).into_response()
}

fn redirect_to(path: &'static str) -> Response {
    warp::redirect::see_other(Uri::from_static(path)).into_response()
}

fn with_cookie(response: Response, cookie: &str) -> Response {
    warp::reply::with_header(response, SET_COOKIE, cookie).into_response()
}

fn apology(status: StatusCode, message: &str) -> Response {
    warp::reply::with_status(html(views::apology(status.as_u16(), message)), status)
        .into_response()
}

fn reject(e: AppError) -> Rejection {
    if e.status().is_server_error() {
        error!("Request failed: {}", e);
    } else {
        info!("Request refused: {}", e);
    }
    warp::reject::custom(e)
}

async fn register_handler(state: AppState, form: RegisterForm) -> Result<Response, Rejection> {
    let username = form.username.unwrap_or_default();
    let password = form.password.unwrap_or_default();
    let confirmation = form.confirmation.unwrap_or_default();

    if username.is_empty() {
        return Err(reject(AppError::validation("must provide username")));
    }
    if password.is_empty() {
        return Err(reject(AppError::validation("must provide password")));
    }
    if confirmation.is_empty() {
        return Err(reject(AppError::validation("must provide password confirmation")));
    }
    let existing = state.db.find_users(&username).await.map_err(reject)?;
    if !existing.is_empty() {
        return Err(reject(AppError::validation("username already exists")));
    }
    if password != confirmation {
        return Err(reject(AppError::validation(
            "password and confirmation do not match",
        )));
    }

    let hash = auth::hash_password(&password, state.session.password_rounds);
    let user = state.db.create_user(&username, &hash).await.map_err(reject)?;
    let session = Session {
        user,
        generation: 0,
    };
    let token = auth::create_token(session, &state.session).map_err(|e| reject(e.into()))?;

    info!("Registered user {} ({})", user, username);
    Ok(with_cookie(redirect_to("/"), &auth::session_cookie(&token)))
}

async fn login_handler(state: AppState, form: LoginForm) -> Result<Response, Rejection> {
    // Any earlier session is dropped whatever the outcome.
    match login(&state, form).await {
        Ok(token) => Ok(with_cookie(redirect_to("/"), &auth::session_cookie(&token))),
        Err(e) => {
            if e.status().is_server_error() {
                error!("Login failed: {}", e);
            } else {
                info!("Login refused: {}", e);
            }
            Ok(with_cookie(
                apology(e.status(), &e.public_message()),
                &auth::clear_session_cookie(),
            ))
        }
    }
}

async fn login(state: &AppState, form: LoginForm) -> Result<String, AppError> {
    let username = form.username.unwrap_or_default();
    let password = form.password.unwrap_or_default();
    if username.is_empty() {
        return Err(AppError::Auth("must provide username".to_string()));
    }
    if password.is_empty() {
        return Err(AppError::Auth("must provide password".to_string()));
    }

    let users = state.db.find_users(&username).await?;
    let user = match users.as_slice() {
        [user] if auth::check_password(&user.hash, &password) => user,
        _ => {
            return Err(AppError::Auth(
                "invalid username and/or password".to_string(),
            ))
        }
    };

    info!("User {} logged in", user.id);
    let session = Session {
        user: user.id,
        generation: user.session_gen,
    };
    Ok(auth::create_token(session, &state.session)?)
}

/// Retires the caller's tokens, if the cookie still holds a live one, and
/// clears the cookie either way.
async fn logout_handler(token: Option<String>, state: AppState) -> Response {
    if let Some(session) = token.and_then(|t| auth::verify_token(&t, &state.session)) {
        match state.db.end_sessions(session.user).await {
            Ok(()) => info!("User {} logged out", session.user),
            Err(e) => error!("Could not end sessions for user {}: {}", session.user, e),
        }
    }
    with_cookie(redirect_to("/login"), &auth::clear_session_cookie())
}

async fn quote_handler(
    _user: UserId,
    state: AppState,
    form: QuoteForm,
) -> Result<Response, Rejection> {
    let quote = ledger::quote(state.oracle.as_ref(), form.symbol.as_deref())
        .await
        .map_err(reject)?;
    Ok(html(views::quoted(&quote)))
}

async fn buy_handler(user: UserId, state: AppState, form: TradeForm) -> Result<Response, Rejection> {
    ledger::buy(
        &state.db,
        state.oracle.as_ref(),
        user,
        form.symbol.as_deref(),
        form.shares.as_deref(),
    )
    .await
    .map_err(reject)?;
    Ok(redirect_to("/"))
}

async fn sell_page_handler(user: UserId, state: AppState) -> Result<Response, Rejection> {
    let symbols = ledger::owned_symbols(&state.db, user)
        .await
        .map_err(reject)?;
    Ok(html(views::sell_form(&symbols)))
}

async fn sell_handler(user: UserId, state: AppState, form: TradeForm) -> Result<Response, Rejection> {
    ledger::sell(
        &state.db,
        state.oracle.as_ref(),
        user,
        form.symbol.as_deref(),
        form.shares.as_deref(),
    )
    .await
    .map_err(reject)?;
    Ok(redirect_to("/"))
}

async fn cash_handler(user: UserId, state: AppState, form: CashForm) -> Result<Response, Rejection> {
    ledger::deposit(&state.db, user, form.amount.as_deref())
        .await
        .map_err(reject)?;
    Ok(redirect_to("/"))
}

async fn index_handler(user: UserId, state: AppState) -> Result<Response, Rejection> {
    let portfolio = ledger::portfolio(&state.db, state.oracle.as_ref(), user)
        .await
        .map_err(reject)?;
    Ok(html(views::index(&portfolio)))
}

async fn history_handler(user: UserId, state: AppState) -> Result<Response, Rejection> {
    let entries = ledger::history(&state.db, user).await.map_err(reject)?;
    Ok(html(views::history(&entries)))
}

fn no_cache_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers
}

/// Turns every rejection into either the login redirect or the apology page.
pub async fn handle_rejection(err: Rejection) -> Result<Response, Infallible> {
    if err.find::<Unauthenticated>().is_some() {
        return Ok(redirect_to("/login"));
    }
    if let Some(e) = err.find::<AppError>() {
        return Ok(apology(e.status(), &e.public_message()));
    }

    let status = if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        StatusCode::METHOD_NOT_ALLOWED
    } else if err.find::<warp::reject::PayloadTooLarge>().is_some() {
        StatusCode::PAYLOAD_TOO_LARGE
    } else if err.find::<warp::reject::UnsupportedMediaType>().is_some() {
        StatusCode::UNSUPPORTED_MEDIA_TYPE
    } else if err.find::<warp::reject::LengthRequired>().is_some() {
        StatusCode::LENGTH_REQUIRED
    } else if err.find::<warp::filters::body::BodyDeserializeError>().is_some() {
        StatusCode::BAD_REQUEST
    } else {
        error!("Unhandled rejection: {:?}", err);
        StatusCode::INTERNAL_SERVER_ERROR
    };
    Ok(apology(
        status,
        status.canonical_reason().unwrap_or("error"),
    ))
}
