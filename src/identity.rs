use std::collections::HashMap;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;

use crate::error::EngineResult;
use crate::model::ParticipantRole;
use crate::util::read_json_file;

pub trait IdentityProvider {
    fn roles_for(&self, user_id: &str) -> EngineResult<Vec<ParticipantRole>>;

    fn has_role(&self, user_id: &str, role: ParticipantRole) -> EngineResult<bool> {
        Ok(self.roles_for(user_id)?.contains(&role))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(transparent)]
pub struct RoleDirectory {
    roles: HashMap<String, Vec<ParticipantRole>>,
}

impl RoleDirectory {
    pub fn load(path: &Path) -> Result<Self> {
        read_json_file(path)
    }

    #[cfg(test)]
    pub fn grant(&mut self, user_id: &str, role: ParticipantRole) -> &mut Self {
        let roles = self.roles.entry(user_id.to_string()).or_default();
        if !roles.contains(&role) {
            roles.push(role);
        }
        self
    }
}

impl IdentityProvider for RoleDirectory {
    fn roles_for(&self, user_id: &str) -> EngineResult<Vec<ParticipantRole>> {
        Ok(self.roles.get(user_id).cloned().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn directory_loads_from_json_and_unknown_users_have_no_roles() {
        let mut file = tempfile::NamedTempFile::new().expect("temp roles file");
        writeln!(file, r#"{{ "lead": ["QA_TL", "RATER"], "sdm": ["AM_SDM"] }}"#)
            .expect("write roles");

        let directory = RoleDirectory::load(file.path()).expect("directory should load");
        assert!(directory.has_role("lead", ParticipantRole::QaTl).expect("lookup"));
        assert!(directory.has_role("lead", ParticipantRole::Rater).expect("lookup"));
        assert!(!directory.has_role("sdm", ParticipantRole::QaTl).expect("lookup"));
        assert!(directory.roles_for("nobody").expect("lookup").is_empty());
    }

    #[test]
    fn grant_does_not_duplicate_roles() {
        let mut directory = RoleDirectory::default();
        directory
            .grant("u", ParticipantRole::Rater)
            .grant("u", ParticipantRole::Rater);
        assert_eq!(
            directory.roles_for("u").expect("lookup"),
            vec![ParticipantRole::Rater]
        );
    }
}
