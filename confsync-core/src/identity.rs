//! Owner/group resolution for template resources.
//!
//! Descriptors may name an owner or group symbolically; the loader turns those
//! into numeric ids through an [`IdentityResolver`]. The process-wide fallback
//! ids are never read implicitly: callers pass a [`ProcessIdentity`].

use std::collections::HashMap;

/// Numeric ids applied when a descriptor sets neither an id nor a name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessIdentity {
    pub uid: u32,
    pub gid: u32,
}

impl ProcessIdentity {
    pub fn new(uid: u32, gid: u32) -> Self {
        Self { uid, gid }
    }

    /// Effective uid/gid of the running process.
    #[cfg(unix)]
    pub fn current() -> Self {
        // SAFETY: geteuid/getegid take no arguments and cannot fail.
        let (uid, gid) = unsafe { (libc::geteuid(), libc::getegid()) };
        Self { uid, gid }
    }

    #[cfg(not(unix))]
    pub fn current() -> Self {
        Self { uid: 0, gid: 0 }
    }
}

/// Resolves symbolic user and group names to numeric ids.
pub trait IdentityResolver: Send + Sync {
    fn lookup_user(&self, name: &str) -> Result<u32, String>;
    fn lookup_group(&self, name: &str) -> Result<u32, String>;
}

/// Resolver backed by the system user/group databases (`getpwnam_r`/`getgrnam_r`).
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemIdentity;

#[cfg(unix)]
impl IdentityResolver for SystemIdentity {
    fn lookup_user(&self, name: &str) -> Result<u32, String> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;

        let c_name = CString::new(name).map_err(|e| e.to_string())?;
        let mut buf = vec![0 as libc::c_char; lookup_buffer_size(libc::_SC_GETPW_R_SIZE_MAX)];
        let mut pwd = MaybeUninit::<libc::passwd>::uninit();
        let mut result: *mut libc::passwd = std::ptr::null_mut();
        loop {
            // SAFETY: all pointers reference live, correctly sized buffers.
            let rc = unsafe {
                libc::getpwnam_r(
                    c_name.as_ptr(),
                    pwd.as_mut_ptr(),
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };
            if rc == libc::ERANGE {
                let len = buf.len() * 2;
                buf.resize(len, 0);
                continue;
            }
            if rc != 0 {
                return Err(std::io::Error::from_raw_os_error(rc).to_string());
            }
            if result.is_null() {
                return Err(format!("unknown user {name}"));
            }
            // SAFETY: a non-null result means `pwd` was initialised.
            return Ok(unsafe { pwd.assume_init() }.pw_uid);
        }
    }

    fn lookup_group(&self, name: &str) -> Result<u32, String> {
        use std::ffi::CString;
        use std::mem::MaybeUninit;

        let c_name = CString::new(name).map_err(|e| e.to_string())?;
        let mut buf = vec![0 as libc::c_char; lookup_buffer_size(libc::_SC_GETGR_R_SIZE_MAX)];
        let mut grp = MaybeUninit::<libc::group>::uninit();
        let mut result: *mut libc::group = std::ptr::null_mut();
        loop {
            // SAFETY: all pointers reference live, correctly sized buffers.
            let rc = unsafe {
                libc::getgrnam_r(
                    c_name.as_ptr(),
                    grp.as_mut_ptr(),
                    buf.as_mut_ptr(),
                    buf.len(),
                    &mut result,
                )
            };
            if rc == libc::ERANGE {
                let len = buf.len() * 2;
                buf.resize(len, 0);
                continue;
            }
            if rc != 0 {
                return Err(std::io::Error::from_raw_os_error(rc).to_string());
            }
            if result.is_null() {
                return Err(format!("unknown group {name}"));
            }
            // SAFETY: a non-null result means `grp` was initialised.
            return Ok(unsafe { grp.assume_init() }.gr_gid);
        }
    }
}

#[cfg(unix)]
fn lookup_buffer_size(key: libc::c_int) -> usize {
    // SAFETY: sysconf only reads a configuration value.
    let hint = unsafe { libc::sysconf(key) };
    if hint > 0 {
        hint as usize
    } else {
        1024
    }
}

#[cfg(not(unix))]
impl IdentityResolver for SystemIdentity {
    fn lookup_user(&self, name: &str) -> Result<u32, String> {
        Err(format!("user lookup for {name} is not supported on this platform"))
    }

    fn lookup_group(&self, name: &str) -> Result<u32, String> {
        Err(format!("group lookup for {name} is not supported on this platform"))
    }
}

/// Fixed name → id tables.
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    users: HashMap<String, u32>,
    groups: HashMap<String, u32>,
}

impl StaticIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn user(mut self, name: impl Into<String>, uid: u32) -> Self {
        self.users.insert(name.into(), uid);
        self
    }

    pub fn group(mut self, name: impl Into<String>, gid: u32) -> Self {
        self.groups.insert(name.into(), gid);
        self
    }
}

impl IdentityResolver for StaticIdentity {
    fn lookup_user(&self, name: &str) -> Result<u32, String> {
        self.users
            .get(name)
            .copied()
            .ok_or_else(|| format!("unknown user {name}"))
    }

    fn lookup_group(&self, name: &str) -> Result<u32, String> {
        self.groups
            .get(name)
            .copied()
            .ok_or_else(|| format!("unknown group {name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_identity_resolves_known_names() {
        let ids = StaticIdentity::new().user("www", 33).group("adm", 4);
        assert_eq!(ids.lookup_user("www"), Ok(33));
        assert_eq!(ids.lookup_group("adm"), Ok(4));
        assert!(ids.lookup_user("nobody-here").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn system_identity_resolves_root() {
        assert_eq!(SystemIdentity.lookup_user("root"), Ok(0));
    }

    #[cfg(unix)]
    #[test]
    fn system_identity_rejects_unknown_user() {
        let err = SystemIdentity
            .lookup_user("confsync-no-such-user-4f1c")
            .unwrap_err();
        assert!(err.contains("confsync-no-such-user-4f1c"), "got: {err}");
    }
}
