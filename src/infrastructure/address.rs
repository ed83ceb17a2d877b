//! GSM dial strings and the contact handle repository

use crate::domain::call::addressing::{AddressResolver, HandleRegistry, SplitAddress};
use crate::domain::call::value_object::ClirOverride;
use crate::domain::shared::value_objects::Handle;
use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard, PoisonError};

const MAX_NUMBER_LEN: usize = 20;
/// Presentation allowed for this call
const CLIR_SHOW: &str = "*31#";
/// Presentation restricted for this call
const CLIR_HIDE: &str = "#31#";

/// Dial string rules for GSM networks
///
/// `[*31#|#31#][+]digits[p|w dtmf]` where digits may contain `*` and `#`
/// and the part after the first pause is sent once the call is active.
#[derive(Debug, Clone, Copy, Default)]
pub struct GsmAddressPlan;

impl GsmAddressPlan {
    pub fn is_valid(destination: &str) -> bool {
        let rest = strip_clir(destination).1;
        let (number, dial2nd) = match rest.find(is_pause) {
            Some(index) => (&rest[..index], Some(&rest[index + 1..])),
            None => (rest, None),
        };

        let digits = number.strip_prefix('+').unwrap_or(number);
        if digits.is_empty() || digits.len() > MAX_NUMBER_LEN {
            return false;
        }
        if !digits.chars().all(|c| c.is_ascii_digit() || c == '*' || c == '#') {
            return false;
        }

        dial2nd.map_or(true, |d| d.chars().all(is_dtmf))
    }

    pub fn split(destination: &str, clir: ClirOverride) -> SplitAddress {
        let (prefix, rest) = strip_clir(destination);
        let clir = prefix.unwrap_or(clir);
        match rest.find(is_pause) {
            Some(index) => SplitAddress {
                number: rest[..index].to_string(),
                dial2nd: Some(rest[index + 1..].to_string()).filter(|d| !d.is_empty()),
                clir,
            },
            None => SplitAddress {
                number: rest.to_string(),
                dial2nd: None,
                clir,
            },
        }
    }
}

fn strip_clir(destination: &str) -> (Option<ClirOverride>, &str) {
    if let Some(rest) = destination.strip_prefix(CLIR_SHOW) {
        (Some(ClirOverride::Disabled), rest)
    } else if let Some(rest) = destination.strip_prefix(CLIR_HIDE) {
        (Some(ClirOverride::Enabled), rest)
    } else {
        (None, destination)
    }
}

fn is_pause(c: char) -> bool {
    matches!(c, 'p' | 'P' | 'w' | 'W')
}

fn is_dtmf(c: char) -> bool {
    c.is_ascii_digit() || matches!(c, '*' | '#' | 'A'..='D' | 'a'..='d') || is_pause(c)
}

#[derive(Debug, Default)]
struct Handles {
    by_id: HashMap<String, Handle>,
    ids: Vec<String>,
}

/// In-memory contact handle repository
///
/// Handles are minted from 1 upwards and never reused.
#[derive(Debug, Default)]
pub struct HandleRepository {
    handles: RwLock<Handles>,
}

impl HandleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Handles> {
        self.handles.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Handles> {
        self.handles.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn len(&self) -> usize {
        self.read().ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().ids.is_empty()
    }
}

impl HandleRegistry for HandleRepository {
    fn ensure(&self, id: &str) -> Handle {
        if let Some(handle) = self.read().by_id.get(id) {
            return *handle;
        }

        let mut handles = self.write();
        if let Some(handle) = handles.by_id.get(id) {
            return *handle;
        }
        handles.ids.push(id.to_string());
        let raw = handles.ids.len() as u32;
        // Handle 0 is reserved, so raw starts at 1 and is never zero
        let handle = Handle::new(raw).unwrap_or_else(|| unreachable!("handle {} is zero", raw));
        handles.by_id.insert(id.to_string(), handle);
        handle
    }

    fn identifier(&self, handle: Handle) -> Option<String> {
        let index = (handle.as_u32() as usize).checked_sub(1)?;
        self.read().ids.get(index).cloned()
    }
}

impl AddressResolver for HandleRepository {
    fn inspect(&self, handle: Handle) -> Option<String> {
        self.identifier(handle)
    }

    fn is_valid_address(&self, destination: &str) -> bool {
        GsmAddressPlan::is_valid(destination)
    }

    fn split_address(&self, destination: &str, clir: ClirOverride) -> SplitAddress {
        GsmAddressPlan::split(destination, clir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_addresses() {
        assert!(GsmAddressPlan::is_valid("+358401234567"));
        assert!(GsmAddressPlan::is_valid("*31#0401234567"));
        assert!(GsmAddressPlan::is_valid("112"));
        assert!(GsmAddressPlan::is_valid("*100#"));
        assert!(GsmAddressPlan::is_valid("0401234567p1234#"));
        assert!(GsmAddressPlan::is_valid("0401234567w12p34"));
    }

    #[test]
    fn test_invalid_addresses() {
        assert!(!GsmAddressPlan::is_valid(""));
        assert!(!GsmAddressPlan::is_valid("+"));
        assert!(!GsmAddressPlan::is_valid("not a number"));
        assert!(!GsmAddressPlan::is_valid("040-1234567"));
        assert!(!GsmAddressPlan::is_valid("123456789012345678901"));
        assert!(!GsmAddressPlan::is_valid("040p12x"));
    }

    #[test]
    fn test_split_address() {
        let split = GsmAddressPlan::split("*31#+358401234567p123", ClirOverride::Default);
        assert_eq!(split.number, "+358401234567");
        assert_eq!(split.dial2nd.as_deref(), Some("123"));
        assert_eq!(split.clir, ClirOverride::Disabled);

        let split = GsmAddressPlan::split("#31#112", ClirOverride::Disabled);
        assert_eq!(split.number, "112");
        assert_eq!(split.dial2nd, None);
        assert_eq!(split.clir, ClirOverride::Enabled);

        let split = GsmAddressPlan::split("5555w", ClirOverride::Default);
        assert_eq!(split.dial2nd, None);
        assert_eq!(split.clir, ClirOverride::Default);
    }

    #[test]
    fn test_handles_are_stable() {
        let repo = HandleRepository::new();
        let a = repo.ensure("+358401234567");
        let b = repo.ensure("+358407654321");
        assert_ne!(a, b);
        assert_eq!(repo.ensure("+358401234567"), a);
        assert_eq!(repo.identifier(b).as_deref(), Some("+358407654321"));
        assert_eq!(repo.inspect(a).as_deref(), Some("+358401234567"));
        assert_eq!(repo.len(), 2);
    }
}
