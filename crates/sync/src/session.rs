//! Current-user session and profile lookups.
//!
//! There is no ambient current user: a `Session` is resolved once at sign-in
//! and passed to every service call that acts on someone's behalf.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::watch;

use reel_shared::constants::DEFAULT_DISPLAY_NAME;
use reel_shared::validation::validate_user_id;

use crate::error::Result;
use crate::models::{paths, Author, Role, UserProfile};
use crate::store::{to_document_data, DocumentStore};

/// What the auth provider hands over once a user is resolved.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AuthIdentity {
    pub uid: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub photo_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub uid: String,
    pub display_name: String,
    pub photo_url: Option<String>,
    pub role: Role,
}

impl Session {
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Denormalized author fields for posts and comments.
    pub fn author(&self) -> Author {
        Author {
            uid: self.uid.clone(),
            display_name: self.display_name.clone(),
            photo_url: self.photo_url.clone(),
        }
    }
}

impl From<UserProfile> for Session {
    fn from(profile: UserProfile) -> Self {
        Self {
            uid: profile.uid,
            display_name: profile.display_name,
            photo_url: profile.photo_url,
            role: profile.role,
        }
    }
}

/// Resolves the session for a signed-in identity, creating the profile on
/// first sign-in. Returning users get their stored profile unchanged.
pub async fn sign_in(store: &dyn DocumentStore, identity: AuthIdentity) -> Result<Session> {
    validate_user_id(&identity.uid)?;
    let path = paths::user(&identity.uid);

    if let Some(doc) = store.get(&path).await? {
        let profile: UserProfile = doc.decode()?;
        tracing::info!(uid = %profile.uid, role = ?profile.role, "returning user signed in");
        return Ok(profile.into());
    }

    let profile = UserProfile {
        uid: identity.uid,
        email: identity.email,
        display_name: identity
            .display_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_DISPLAY_NAME.to_string()),
        photo_url: identity.photo_url,
        role: Role::Member,
        created_at: Utc::now(),
    };
    store.set(&path, to_document_data(&profile)?).await?;
    tracing::info!(uid = %profile.uid, "created profile on first sign-in");
    Ok(profile.into())
}

#[derive(Default)]
struct CacheState {
    profiles: HashMap<String, UserProfile>,
    in_flight: HashSet<String>,
}

/// Best-effort profile cache keyed by uid.
///
/// Lookups never block: `hydrate` starts a background fetch for ids not yet
/// cached, and readers see `None` until it lands. Misses and errors are only
/// logged; a later `hydrate` call tries again.
#[derive(Clone)]
pub struct ProfileCache {
    store: Arc<dyn DocumentStore>,
    state: Arc<Mutex<CacheState>>,
    version: Arc<watch::Sender<u64>>,
}

impl ProfileCache {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            store,
            state: Arc::new(Mutex::new(CacheState::default())),
            version: Arc::new(version),
        }
    }

    pub fn get(&self, uid: &str) -> Option<UserProfile> {
        self.state.lock().profiles.get(uid).cloned()
    }

    pub fn len(&self) -> usize {
        self.state.lock().profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bumped every time a profile lands in the cache.
    pub fn changes(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }

    pub fn hydrate<I>(&self, uids: I)
    where
        I: IntoIterator<Item = String>,
    {
        for uid in uids {
            {
                let mut state = self.state.lock();
                if state.profiles.contains_key(&uid) || !state.in_flight.insert(uid.clone()) {
                    continue;
                }
            }

            let cache = self.clone();
            tokio::spawn(async move {
                let fetched = cache.store.get(&paths::user(&uid)).await;
                let mut state = cache.state.lock();
                state.in_flight.remove(&uid);
                match fetched.and_then(|doc| doc.map(|d| d.decode::<UserProfile>()).transpose()) {
                    Ok(Some(profile)) => {
                        state.profiles.insert(uid, profile);
                        drop(state);
                        cache.version.send_modify(|v| *v += 1);
                    }
                    Ok(None) => tracing::warn!(uid = %uid, "profile not found"),
                    Err(e) => tracing::warn!(uid = %uid, error = %e, "profile hydration failed"),
                }
            });
        }
    }
}
