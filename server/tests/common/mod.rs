#![allow(dead_code)]

use std::net::{SocketAddr, TcpListener};

use parley_proto::{Member, Profile, Role};
use parley_server::{
    api::{self, AppState},
    auth,
    config::{Config, JwtSecret},
    directory,
};
use tokio::task::JoinHandle;
use uuid::Uuid;

pub struct Party {
    pub profile: Profile,
    pub member: Member,
    pub token: String,
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    pub handle: JoinHandle<()>,
    pub server: Uuid,
    pub channel: Uuid,
    pub conversation: Uuid,
    /// Guest member who authors most messages.
    pub alice: Party,
    /// Server owner, admin.
    pub bob: Party,
    /// Guest member of the same server.
    pub carol: Party,
    /// Profile with no membership at all.
    pub eve: Party,
    _tmp: tempfile::TempDir,
}

impl TestServer {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}/ws", self.addr)
    }

    /// A fresh profile with no membership and its bearer token.
    pub fn newcomer(&self, name: &str) -> (Profile, String) {
        let conn = self.state.store.conn().unwrap();
        let profile = directory::create_profile(&conn, name, None).unwrap();
        let token = token(&self.state.config, &profile);
        (profile, token)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn token(cfg: &Config, profile: &Profile) -> String {
    auth::issue_jwt(
        cfg.jwt_secret.as_bytes(),
        &profile.id.to_string(),
        time::Duration::hours(1),
    )
    .unwrap()
}

pub async fn spawn() -> TestServer {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let tmp = tempfile::tempdir().unwrap();
    let cfg = Config {
        bind: addr.to_string(),
        data_dir: tmp.path().to_path_buf(),
        logging_enabled: false,
        jwt_secret: JwtSecret::new("test-secret"),
        bootstrap: None,
    };
    let state = AppState::new(cfg.clone()).await.unwrap();

    let conn = state.store.conn().unwrap();
    let bob_profile = directory::create_profile(&conn, "Bob", None).unwrap();
    let server = directory::create_server(&conn, &bob_profile, "Home", None).unwrap();
    let alice_profile = directory::create_profile(&conn, "Alice", None).unwrap();
    let alice_member =
        directory::add_member(&conn, &server.id, &alice_profile.id, Role::Guest).unwrap();
    let carol_profile = directory::create_profile(&conn, "Carol", None).unwrap();
    let carol_member =
        directory::add_member(&conn, &server.id, &carol_profile.id, Role::Guest).unwrap();
    let eve_profile = directory::create_profile(&conn, "Eve", None).unwrap();
    let conversation =
        directory::get_or_create_conversation(&conn, &alice_member.id, &server.owner.id).unwrap();
    drop(conn);

    let party = |profile: Profile, member: Member| Party {
        token: token(&cfg, &profile),
        profile,
        member,
    };
    let eve_member = Member {
        id: Uuid::nil(),
        role: Role::Guest,
        profile_id: eve_profile.id,
        server_id: Uuid::nil(),
    };
    let alice = party(alice_profile, alice_member);
    let bob = party(bob_profile, server.owner.clone());
    let carol = party(carol_profile, carol_member);
    let eve = party(eve_profile, eve_member);

    let serving = state.clone();
    let handle = tokio::spawn(async move {
        api::serve(listener, serving).await.unwrap();
    });

    TestServer {
        addr,
        state,
        handle,
        server: server.id,
        channel: server.general_channel,
        conversation,
        alice,
        bob,
        carol,
        eve,
        _tmp: tmp,
    }
}
