//! # Owner Reference Resolution
//!
//! Maps textual owner references (emails, the all-users wildcard) to
//! concrete accounts. Emails pass a domain allow-list first, then resolve
//! through the account provider; inactive accounts are dropped and ambiguous
//! emails stay unresolved. When visibility is enforced, the viewing user
//! must be able to see the account, and secondary emails resolve only for
//! their owner or for users who may modify accounts.
//!
//! Unresolvable references never fail the resolution; they set
//! `has_unresolved` and leave an audit message.

use std::collections::BTreeSet;

use super::loader::CancelFlag;
use super::providers::AccountProvider;
use super::types::{AccountId, CodeOwnerReference};
use crate::utils::error::Result;

/// Accumulated outcome of resolving a set of owner references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResolvedOwners {
    pub owners: BTreeSet<AccountId>,
    pub owned_by_all_users: bool,
    pub has_unresolved: bool,
    pub has_unresolved_imports: bool,
    /// Audit-only messages explaining unresolved references.
    pub messages: Vec<String>,
}

impl ResolvedOwners {
    pub fn merge(&mut self, other: ResolvedOwners) {
        self.owners.extend(other.owners);
        self.owned_by_all_users |= other.owned_by_all_users;
        self.has_unresolved |= other.has_unresolved;
        self.has_unresolved_imports |= other.has_unresolved_imports;
        self.messages.extend(other.messages);
    }
}

/// Outcome for a single reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OwnerResolution {
    AllUsers,
    Account(AccountId),
    Unresolved(String),
}

/// Resolver flags plus the account provider seam.
pub struct OwnerResolver<'a> {
    accounts: &'a dyn AccountProvider,
    cancel: CancelFlag,
    allowed_email_domains: BTreeSet<String>,
    enforce_visibility: bool,
    viewer: Option<AccountId>,
}

impl<'a> OwnerResolver<'a> {
    pub fn new(accounts: &'a dyn AccountProvider, cancel: CancelFlag) -> Self {
        Self {
            accounts,
            cancel,
            allowed_email_domains: BTreeSet::new(),
            enforce_visibility: false,
            viewer: None,
        }
    }

    /// Restrict resolvable emails to the given domains. An empty set allows
    /// any domain.
    pub fn with_allowed_domains(mut self, domains: BTreeSet<String>) -> Self {
        self.allowed_email_domains = domains;
        self
    }

    /// Enforce account visibility as seen by `viewer`.
    pub fn enforcing_visibility(mut self, viewer: AccountId) -> Self {
        self.enforce_visibility = true;
        self.viewer = Some(viewer);
        self
    }

    /// Resolve a single reference.
    pub fn resolve_reference(&self, reference: &CodeOwnerReference) -> Result<OwnerResolution> {
        let email = match reference {
            CodeOwnerReference::AllUsers => return Ok(OwnerResolution::AllUsers),
            CodeOwnerReference::Email(email) => email,
        };

        // Domain policy. The wildcard never reaches this point.
        let Some(domain) = email.rsplit('@').next().filter(|_| email.contains('@')) else {
            return Ok(OwnerResolution::Unresolved(format!(
                "cannot resolve code owner '{}': not an email address",
                email
            )));
        };
        if !self.allowed_email_domains.is_empty()
            && !self.allowed_email_domains.contains(domain)
        {
            return Ok(OwnerResolution::Unresolved(format!(
                "cannot resolve code owner '{}': domain {} is not allowed",
                email, domain
            )));
        }

        self.cancel.check()?;
        let candidates = self.accounts.lookup_by_email(email)?;

        let mut active = BTreeSet::new();
        for id in candidates {
            if let Some(account) = self.accounts.get(id)? {
                if account.active {
                    active.insert(id);
                }
            }
        }

        let account_id = match active.len() {
            0 => {
                return Ok(OwnerResolution::Unresolved(format!(
                    "cannot resolve code owner '{}': no active account found",
                    email
                )));
            }
            1 => *active.iter().next().unwrap(),
            _ => {
                return Ok(OwnerResolution::Unresolved(format!(
                    "cannot resolve code owner '{}': email is ambiguous",
                    email
                )));
            }
        };

        if self.enforce_visibility {
            if let Some(message) = self.check_visibility(account_id, email)? {
                return Ok(OwnerResolution::Unresolved(message));
            }
        }

        Ok(OwnerResolution::Account(account_id))
    }

    /// Resolve many references into one accumulated result.
    pub fn resolve_all<'i, I>(&self, references: I) -> Result<ResolvedOwners>
    where
        I: IntoIterator<Item = &'i CodeOwnerReference>,
    {
        let mut result = ResolvedOwners::default();

        for reference in references {
            match self.resolve_reference(reference)? {
                OwnerResolution::AllUsers => result.owned_by_all_users = true,
                OwnerResolution::Account(id) => {
                    result.owners.insert(id);
                }
                OwnerResolution::Unresolved(message) => {
                    log::debug!("{}", message);
                    result.has_unresolved = true;
                    result.messages.push(message);
                }
            }
        }

        Ok(result)
    }

    /// `None` when the account may be used, otherwise the reason it may not.
    fn check_visibility(&self, account_id: AccountId, email: &str) -> Result<Option<String>> {
        let Some(viewer) = self.viewer else {
            return Ok(None);
        };

        if !self.accounts.can_see(viewer, account_id)? {
            return Ok(Some(format!(
                "cannot resolve code owner '{}': account is not visible",
                email
            )));
        }

        let is_secondary = self
            .accounts
            .get(account_id)?
            .map(|account| account.is_secondary_email(email))
            .unwrap_or(false);
        if is_secondary
            && viewer != account_id
            && !self.accounts.has_email(viewer, email)?
            && !self.accounts.can_modify_accounts(viewer)?
        {
            return Ok(Some(format!(
                "cannot resolve code owner '{}': secondary email is not visible",
                email
            )));
        }

        Ok(None)
    }
}
