use finance::auth::SessionSettings;
use finance::oracle::FixedPriceOracle;
use finance::{routes, AppState, Database};
use rust_decimal_macros::dec;
use std::sync::Arc;
use warp::http::StatusCode;
use warp::Filter;

const FORM: &str = "application/x-www-form-urlencoded";

async fn app() -> (
    impl Filter<Extract = impl warp::Reply, Error = std::convert::Infallible> + Clone + 'static,
    Database,
) {
    let db = Database::new_in_memory().await.unwrap();
    let oracle = FixedPriceOracle::new();
    oracle.set_price("AAPL", "Apple Inc.", dec!(150.00));
    let session = SessionSettings {
        secret: "http-test-secret".to_string(),
        ttl_secs: 3600,
        password_rounds: 1_000,
    };
    let state = AppState::new(db.clone(), Arc::new(oracle), session);
    (routes(state), db)
}

fn session_of(response: &warp::http::Response<warp::hyper::body::Bytes>) -> Option<String> {
    let cookie = response.headers().get("set-cookie")?.to_str().ok()?;
    let pair = cookie.split(';').next()?;
    if pair == "session=" {
        None
    } else {
        Some(pair.to_string())
    }
}

fn body(response: &warp::http::Response<warp::hyper::body::Bytes>) -> String {
    String::from_utf8_lossy(response.body()).to_string()
}

async fn register<F>(filter: &F, username: &str) -> String
where
    F: Filter + 'static,
    F::Extract: warp::Reply + Send,
{
    let res = warp::test::request()
        .method("POST")
        .path("/register")
        .header("content-type", FORM)
        .body(format!(
            "username={u}&password=pw&confirmation=pw",
            u = username
        ))
        .reply(filter)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()["location"], "/");
    session_of(&res).expect("registration sets a session")
}

#[tokio::test]
async fn protected_pages_redirect_to_login() {
    let (app, _db) = app().await;
    for path in ["/", "/history", "/quote", "/buy", "/sell", "/cash"] {
        let res = warp::test::request().path(path).reply(&app).await;
        assert_eq!(res.status(), StatusCode::SEE_OTHER, "{}", path);
        assert_eq!(res.headers()["location"], "/login");
    }

    let res = warp::test::request()
        .path("/")
        .header("cookie", "session=forged.token.value")
        .reply(&app)
        .await;
    assert_eq!(res.headers()["location"], "/login");
}

#[tokio::test]
async fn register_then_view_portfolio() {
    let (app, _db) = app().await;
    let cookie = register(&app, "alice").await;

    let res = warp::test::request()
        .path("/")
        .header("cookie", &cookie)
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["cache-control"], "no-cache, no-store, must-revalidate");
    assert_eq!(res.headers()["pragma"], "no-cache");
    assert!(body(&res).contains("$10,000.00"));
}

#[tokio::test]
async fn duplicate_registration_is_refused() {
    let (app, db) = app().await;
    register(&app, "alice").await;

    let res = warp::test::request()
        .method("POST")
        .path("/register")
        .header("content-type", FORM)
        .body("username=alice&password=other&confirmation=other")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body(&res).contains("username already exists"));
    assert_eq!(db.find_users("alice").await.unwrap().len(), 1);
}

#[tokio::test]
async fn registration_requires_matching_fields() {
    let (app, _db) = app().await;
    let cases = [
        ("password=pw&confirmation=pw", "must provide username"),
        ("username=bob&confirmation=pw", "must provide password"),
        ("username=bob&password=pw", "must provide password confirmation"),
        (
            "username=bob&password=pw&confirmation=wp",
            "password and confirmation do not match",
        ),
    ];
    for (form, message) in cases {
        let res = warp::test::request()
            .method("POST")
            .path("/register")
            .header("content-type", FORM)
            .body(form)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
        assert!(body(&res).contains(message), "{}", form);
    }
}

#[tokio::test]
async fn login_checks_password() {
    let (app, _db) = app().await;
    register(&app, "carol").await;

    let res = warp::test::request()
        .method("POST")
        .path("/login")
        .header("content-type", FORM)
        .header("cookie", "session=stale")
        .body("username=carol&password=wrong")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
    assert!(body(&res).contains("invalid username and/or password"));
    assert_eq!(session_of(&res), None);

    let res = warp::test::request()
        .method("POST")
        .path("/login")
        .header("content-type", FORM)
        .body("username=nobody&password=pw")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = warp::test::request()
        .method("POST")
        .path("/login")
        .header("content-type", FORM)
        .body("username=carol&password=pw")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert!(session_of(&res).is_some());
}

#[tokio::test]
async fn logout_clears_session() {
    let (app, _db) = app().await;
    let cookie = register(&app, "dave").await;

    let res = warp::test::request()
        .path("/logout")
        .header("cookie", &cookie)
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()["location"], "/login");
    let set = res.headers()["set-cookie"].to_str().unwrap();
    assert!(set.starts_with("session=;"));
    assert!(set.contains("Max-Age=0"));

    // A copy of the old cookie no longer opens a session.
    let res = warp::test::request()
        .path("/")
        .header("cookie", &cookie)
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()["location"], "/login");

    let res = warp::test::request()
        .method("POST")
        .path("/login")
        .header("content-type", FORM)
        .body("username=dave&password=pw")
        .reply(&app)
        .await;
    let fresh = session_of(&res).expect("login sets a session");
    let res = warp::test::request()
        .path("/")
        .header("cookie", &fresh)
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn buy_sell_and_history() {
    let (app, _db) = app().await;
    let cookie = register(&app, "erin").await;

    let res = warp::test::request()
        .method("POST")
        .path("/buy")
        .header("content-type", FORM)
        .header("cookie", &cookie)
        .body("symbol=aapl&shares=5")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);
    assert_eq!(res.headers()["location"], "/");

    let res = warp::test::request()
        .path("/")
        .header("cookie", &cookie)
        .reply(&app)
        .await;
    let page = body(&res);
    assert!(page.contains("Apple Inc."));
    assert!(page.contains("$9,250.00"));
    assert!(page.contains("$750.00"));

    let res = warp::test::request()
        .path("/sell")
        .header("cookie", &cookie)
        .reply(&app)
        .await;
    assert!(body(&res).contains(r#"<option value="AAPL">AAPL</option>"#));

    let res = warp::test::request()
        .method("POST")
        .path("/sell")
        .header("content-type", FORM)
        .header("cookie", &cookie)
        .body("symbol=AAPL&shares=6")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert!(body(&res).contains("must provide valid number of owned shares"));

    let res = warp::test::request()
        .method("POST")
        .path("/sell")
        .header("content-type", FORM)
        .header("cookie", &cookie)
        .body("symbol=AAPL&shares=2")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let res = warp::test::request()
        .path("/history")
        .header("cookie", &cookie)
        .reply(&app)
        .await;
    let page = body(&res);
    let bought = page.find("<td>AAPL</td><td>5</td><td>$150.00</td>").unwrap();
    let sold = page.find("<td>AAPL</td><td>-2</td><td>$150.00</td>").unwrap();
    assert!(bought < sold);
}

#[tokio::test]
async fn trade_errors_render_apology() {
    let (app, _db) = app().await;
    let cookie = register(&app, "frank").await;

    let cases = [
        ("/buy", "symbol=AAPL&shares=1000", "not enough funds for transaction"),
        ("/buy", "symbol=ZZZZ&shares=1", "must provide valid stock symbol"),
        ("/buy", "shares=1", "must provide stock symbol"),
        ("/quote", "symbol=", "must provide stock symbol"),
        ("/quote", "symbol=ZZZZ", "must provide valid stock symbol"),
        ("/cash", "amount=-5", "must provide valid amount of cash to add"),
        ("/cash", "amount=", "must provide amount of cash to add"),
    ];
    for (path, form, message) in cases {
        let res = warp::test::request()
            .method("POST")
            .path(path)
            .header("content-type", FORM)
            .header("cookie", &cookie)
            .body(form)
            .reply(&app)
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{} {}", path, form);
        assert!(body(&res).contains(message), "{} {}", path, form);
    }
}

#[tokio::test]
async fn quote_and_deposit() {
    let (app, db) = app().await;
    let cookie = register(&app, "grace").await;

    let res = warp::test::request()
        .method("POST")
        .path("/quote")
        .header("content-type", FORM)
        .header("cookie", &cookie)
        .body("symbol=aapl")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert!(body(&res).contains("A share of Apple Inc. (AAPL) costs $150.00."));

    let res = warp::test::request()
        .method("POST")
        .path("/cash")
        .header("content-type", FORM)
        .header("cookie", &cookie)
        .body("amount=100.00")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::SEE_OTHER);

    let user = db.find_users("grace").await.unwrap().remove(0);
    assert_eq!(user.cash, dec!(10100.00));
    assert!(db.ledger(user.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn framework_errors_use_apology_page() {
    let (app, _db) = app().await;

    let res = warp::test::request().path("/nowhere").reply(&app).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
    assert!(body(&res).contains("Not Found"));

    let res = warp::test::request()
        .method("DELETE")
        .path("/login")
        .reply(&app)
        .await;
    assert_eq!(res.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert!(body(&res).contains("405"));
}
