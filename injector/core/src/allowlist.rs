use ahash::AHashSet;
use anyhow::Result;
use futures::prelude::*;
use std::{fmt, str::FromStr, sync::Arc};
use thiserror::Error;


/// The number of service account lookups that may be in flight at once.
const MAX_CONCURRENT_LOOKUPS: usize = 4;

/// Identifies a service account by namespace and name.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Identity {
    pub namespace: String,
    pub name: String,
}

/// The UIDs of service accounts trusted to request injection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustedUids(Arc<AHashSet<String>>);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("service account '{0}' must have the form 'namespace:name'")]
pub struct InvalidIdentity(String);

/// Reads service accounts from the cluster.
#[async_trait::async_trait]
pub trait ServiceAccountReader {
    /// Returns the UID of the named service account, or `None` if it does not
    /// exist.
    async fn service_account_uid(&self, namespace: &str, name: &str) -> Result<Option<String>>;
}

/// Resolves the UIDs of all `identities` that exist in the cluster.
///
/// Identities that do not exist are skipped. Any other failure aborts the
/// resolution: a partially resolved set is never returned.
pub async fn resolve<'a, R>(
    identities: impl IntoIterator<Item = &'a Identity>,
    reader: &R,
) -> Result<TrustedUids>
where
    R: ServiceAccountReader + Sync,
{
    let uids = stream::iter(identities)
        .map(|id| async move {
            let uid = reader.service_account_uid(&id.namespace, &id.name).await?;
            Ok::<_, anyhow::Error>((id, uid))
        })
        .buffer_unordered(MAX_CONCURRENT_LOOKUPS)
        .try_fold(AHashSet::new(), |mut uids, (id, uid)| async move {
            match uid {
                Some(uid) => {
                    tracing::debug!(%id, %uid, "Trusting service account");
                    uids.insert(uid);
                }
                None => tracing::debug!(%id, "Service account not found"),
            }
            Ok::<_, anyhow::Error>(uids)
        })
        .await?;
    Ok(TrustedUids(Arc::new(uids)))
}

// === impl Identity ===

impl Identity {
    pub fn new(namespace: impl ToString, name: impl ToString) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
        }
    }

    /// Parses a comma-separated list of `namespace:name` pairs, ignoring empty
    /// entries.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, InvalidIdentity> {
        s.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::parse)
            .collect()
    }
}

impl FromStr for Identity {
    type Err = InvalidIdentity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().split_once(':') {
            Some((ns, name))
                if !ns.trim().is_empty() && !name.trim().is_empty() && !name.contains(':') =>
            {
                Ok(Self::new(ns.trim(), name.trim()))
            }
            _ => Err(InvalidIdentity(s.to_string())),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.namespace, self.name)
    }
}

// === impl TrustedUids ===

impl TrustedUids {
    pub fn contains(&self, uid: &str) -> bool {
        self.0.contains(uid)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for TrustedUids {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(Arc::new(iter.into_iter().map(Into::into).collect()))
    }
}
