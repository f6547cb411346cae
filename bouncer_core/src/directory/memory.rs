use super::*;
use crate::utils::{now, Pattern};

use parking_lot::RwLock;
use pwhash::unix;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Failed logins from one address before it's blocked
const BAD_LOGIN_LIMIT: usize = 3;
/// How long a failed login counts against its address, in seconds
const BAD_LOGIN_WINDOW: i64 = 300;

fn default_host_allows() -> Vec<String> {
    vec!["*".to_string()]
}

/// Static definition of a user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct UserSettings {
    pub name: String,
    /// Password hash, in any format understood by `crypt(3)`
    pub password: String,
    #[serde(default)]
    pub admin: bool,
    #[serde(default)]
    pub suspended: bool,
    pub nick: Option<String>,
    pub realname: Option<String>,
    /// `host:port` of the IRC server to keep a connection to
    pub upstream: Option<String>,
    #[serde(default = "default_host_allows")]
    pub host_allows: Vec<String>,
    /// SHA-1 fingerprints of client certificates that authenticate as this user
    #[serde(default)]
    pub certificates: Vec<String>,
}

#[derive(Debug)]
struct MemoryUserState {
    suspended: bool,
    nick: Option<String>,
    away_text: Option<String>,
    host_allows: Vec<Pattern>,
    keyring: HashMap<String, String>,
    last_seen: i64,
    bad_logins: Vec<(IpAddr, i64)>,
}

/// A [`UserIdentity`] held entirely in memory
pub struct MemoryUser {
    settings: UserSettings,
    state: RwLock<MemoryUserState>,
    upstream: RwLock<Option<Arc<dyn UpstreamLink>>>,
}

fn normalise_fingerprint(fp: &str) -> String {
    fp.chars()
        .filter(|c| *c != ':')
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

impl MemoryUser {
    pub fn new(settings: UserSettings) -> Self {
        let state = MemoryUserState {
            suspended: settings.suspended,
            nick: settings.nick.clone(),
            away_text: None,
            host_allows: settings.host_allows.iter().map(Pattern::new).collect(),
            keyring: HashMap::new(),
            last_seen: 0,
            bad_logins: Vec::new(),
        };

        Self {
            settings,
            state: RwLock::new(state),
            upstream: RwLock::new(None),
        }
    }

    pub fn settings(&self) -> &UserSettings {
        &self.settings
    }

    pub fn set_upstream(&self, upstream: Option<Arc<dyn UpstreamLink>>) {
        *self.upstream.write() = upstream;
    }

    fn recent_bad_logins(&self, addr: IpAddr) -> usize {
        let cutoff = now() - BAD_LOGIN_WINDOW;
        self.state
            .read()
            .bad_logins
            .iter()
            .filter(|(a, ts)| *a == addr && *ts > cutoff)
            .count()
    }
}

impl UserIdentity for MemoryUser {
    fn name(&self) -> &str {
        &self.settings.name
    }

    fn is_admin(&self) -> bool {
        self.settings.admin
    }

    fn is_suspended(&self) -> bool {
        self.state.read().suspended
    }

    fn set_suspended(&self, suspended: bool) {
        self.state.write().suspended = suspended;
    }

    fn validate_password(&self, password: &str) -> bool {
        unix::verify(password, &self.settings.password)
    }

    fn matches_certificate(&self, fingerprint: &str) -> bool {
        let fingerprint = normalise_fingerprint(fingerprint);
        self.settings
            .certificates
            .iter()
            .any(|c| normalise_fingerprint(c) == fingerprint)
    }

    fn is_ip_blocked(&self, addr: IpAddr) -> bool {
        self.recent_bad_logins(addr) >= BAD_LOGIN_LIMIT
    }

    fn can_host_connect(&self, hostname: &str) -> bool {
        // An empty list places no restriction
        let state = self.state.read();
        state.host_allows.is_empty() || state.host_allows.iter().any(|p| p.matches(hostname))
    }

    fn log_bad_login(&self, addr: IpAddr) {
        let now = now();
        let mut state = self.state.write();
        state.bad_logins.retain(|(_, ts)| *ts > now - BAD_LOGIN_WINDOW);
        state.bad_logins.push((addr, now));
    }

    fn client_attached(&self) {
        self.state.write().last_seen = now();
    }

    fn client_detached(&self) {
        self.state.write().last_seen = now();
    }

    fn last_seen(&self) -> i64 {
        self.state.read().last_seen
    }

    fn upstream(&self) -> Option<Arc<dyn UpstreamLink>> {
        self.upstream.read().clone()
    }

    fn nick(&self) -> Option<String> {
        self.state.read().nick.clone()
    }

    fn set_nick(&self, nick: &str) {
        self.state.write().nick = Some(nick.to_string());
    }

    fn realname(&self) -> Option<String> {
        self.settings.realname.clone()
    }

    fn away_text(&self) -> Option<String> {
        self.state.read().away_text.clone()
    }

    fn set_away_text(&self, text: &str) {
        self.state.write().away_text = Some(text.to_string());
    }

    fn channel_key(&self, channel: &str) -> Option<String> {
        self.state
            .read()
            .keyring
            .get(&channel.to_ascii_lowercase())
            .cloned()
    }

    fn set_channel_key(&self, channel: &str, key: &str) {
        self.state
            .write()
            .keyring
            .insert(channel.to_ascii_lowercase(), key.to_string());
    }

    fn host_allows(&self) -> Vec<String> {
        self.state
            .read()
            .host_allows
            .iter()
            .map(|p| p.to_string())
            .collect()
    }

    fn add_host_allow(&self, mask: &str) -> Result<(), HostListError> {
        let mut state = self.state.write();
        if state.host_allows.iter().any(|p| p.eq_ignore_ascii_case(mask)) {
            return Err(HostListError::Duplicate(mask.to_string()));
        }
        if state.host_allows.len() >= MAX_HOST_ALLOWS {
            return Err(HostListError::Full);
        }
        state.host_allows.push(Pattern::new(mask));
        Ok(())
    }

    fn remove_host_allow(&self, mask: &str) -> bool {
        let mut state = self.state.write();
        let before = state.host_allows.len();
        state.host_allows.retain(|p| !p.eq_ignore_ascii_case(mask));
        state.host_allows.len() != before
    }
}

/// A [`UserDirectory`] holding [`MemoryUser`]s
#[derive(Default)]
pub struct MemoryUserDirectory {
    users: RwLock<HashMap<String, Arc<MemoryUser>>>,
}

impl MemoryUserDirectory {
    pub fn new(settings: impl IntoIterator<Item = UserSettings>) -> Self {
        let dir = Self::default();
        for user in settings {
            dir.insert(Arc::new(MemoryUser::new(user)));
        }
        dir
    }

    pub fn insert(&self, user: Arc<MemoryUser>) {
        self.users
            .write()
            .insert(user.name().to_ascii_lowercase(), user);
    }

    /// The concrete user, for callers that need more than [`UserIdentity`]
    pub fn get(&self, name: &str) -> Option<Arc<MemoryUser>> {
        self.users.read().get(&name.to_ascii_lowercase()).cloned()
    }
}

impl UserDirectory for MemoryUserDirectory {
    fn lookup(&self, name: &str) -> Option<Arc<dyn UserIdentity>> {
        self.get(name).map(|u| u as Arc<dyn UserIdentity>)
    }

    fn users(&self) -> Vec<Arc<dyn UserIdentity>> {
        let mut users: Vec<_> = self
            .users
            .read()
            .values()
            .map(|u| Arc::clone(u) as Arc<dyn UserIdentity>)
            .collect();
        users.sort_by(|a, b| a.name().cmp(b.name()));
        users
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn settings(name: &str) -> UserSettings {
        UserSettings {
            name: name.to_string(),
            password: pwhash::sha512_crypt::hash("secret").unwrap(),
            admin: false,
            suspended: false,
            nick: None,
            realname: None,
            upstream: None,
            host_allows: vec!["*.example.org".to_string()],
            certificates: vec!["AB:CD:EF".to_string()],
        }
    }

    #[test]
    fn checks_credentials() {
        let user = MemoryUser::new(settings("alice"));

        assert!(user.validate_password("secret"));
        assert!(!user.validate_password("wrong"));
        assert!(user.matches_certificate("abcdef"));
        assert!(!user.matches_certificate("abcd00"));
        assert!(user.can_host_connect("shell.example.org"));
        assert!(!user.can_host_connect("evil.example.net"));
    }

    #[test]
    fn blocks_after_repeated_failures() {
        let user = MemoryUser::new(settings("alice"));
        let addr: IpAddr = "198.51.100.4".parse().unwrap();
        let other: IpAddr = "198.51.100.5".parse().unwrap();

        for _ in 0..BAD_LOGIN_LIMIT - 1 {
            user.log_bad_login(addr);
        }
        assert!(!user.is_ip_blocked(addr));

        user.log_bad_login(addr);
        assert!(user.is_ip_blocked(addr));
        assert!(!user.is_ip_blocked(other));
    }

    #[test]
    fn host_allow_list_is_bounded() {
        let user = MemoryUser::new(settings("alice"));

        assert_eq!(
            user.add_host_allow("*.EXAMPLE.org"),
            Err(HostListError::Duplicate("*.EXAMPLE.org".to_string()))
        );

        for i in 1..MAX_HOST_ALLOWS {
            user.add_host_allow(&format!("10.0.0.{}", i)).unwrap();
        }
        assert_eq!(user.add_host_allow("10.1.1.1"), Err(HostListError::Full));

        assert!(user.remove_host_allow("10.0.0.1"));
        assert!(!user.remove_host_allow("10.0.0.1"));
        assert!(user.add_host_allow("10.1.1.1").is_ok());
    }

    #[test]
    fn empty_host_list_allows_everyone() {
        let user = MemoryUser::new(settings("alice"));

        assert!(user.remove_host_allow("*.example.org"));
        assert!(user.host_allows().is_empty());
        assert!(user.can_host_connect("evil.example.net"));
        assert!(user.can_host_connect("198.51.100.4"));
    }

    #[test]
    fn directory_lookup_ignores_case() {
        let dir = MemoryUserDirectory::new([settings("Alice"), settings("bob")]);

        assert_eq!(dir.lookup("alice").unwrap().name(), "Alice");
        assert!(dir.lookup("carol").is_none());
        let names: Vec<_> = dir.users().iter().map(|u| u.name().to_string()).collect();
        assert_eq!(names, vec!["Alice", "bob"]);
    }
}
