use azbackup_domain::{RoleAssignment, RoleDefinition};
use tracing::debug;

use crate::client::ArmClient;
use crate::error::ArmError;
use crate::pager::Pager;

const API_VERSION: &str = "2022-04-01";

pub struct RoleDefinitions {
    client: ArmClient,
    subscription_id: String,
}

impl RoleDefinitions {
    pub fn new(client: &ArmClient, subscription_id: impl Into<String>) -> Self {
        Self {
            client: client.clone(),
            subscription_id: subscription_id.into(),
        }
    }

    /// List definitions visible at the subscription whose name matches exactly.
    pub fn list_by_name(&self, role_name: &str) -> Result<Pager<RoleDefinition>, ArmError> {
        let url = self.client.filtered_url(
            &format!("/subscriptions/{}/providers/Microsoft.Authorization/roleDefinitions", self.subscription_id),
            API_VERSION,
            &format!("roleName eq '{}'", role_name),
        )?;
        Ok(self.client.pager(url))
    }

    /// Look up a role definition by display name. Exactly one definition must
    /// carry the name; zero or several is [`ArmError::RoleDefinitionLookup`].
    pub async fn find_by_name(&self, role_name: &str) -> Result<RoleDefinition, ArmError> {
        let mut matches: Vec<RoleDefinition> = self
            .list_by_name(role_name)?
            .collect_all()
            .await?
            .into_iter()
            .filter(|d| d.properties.role_name == role_name)
            .collect();
        if matches.len() != 1 {
            return Err(ArmError::RoleDefinitionLookup {
                name: role_name.to_string(),
                count: matches.len(),
            });
        }
        let def = matches.remove(0);
        debug!(role_name, id = %def.id, "resolved role definition");
        Ok(def)
    }
}

pub struct RoleAssignments {
    client: ArmClient,
}

impl RoleAssignments {
    pub fn new(client: &ArmClient) -> Self {
        Self { client: client.clone() }
    }

    /// Assignments at (or inherited by) `scope` for one principal.
    pub fn list_for_scope(&self, scope: &str, principal_id: &str) -> Result<Pager<RoleAssignment>, ArmError> {
        let url = self.client.filtered_url(
            &format!("{}/providers/Microsoft.Authorization/roleAssignments", scope),
            API_VERSION,
            &format!("principalId eq '{}'", principal_id),
        )?;
        Ok(self.client.pager(url))
    }

    /// The principal's assignment of `definition` on `scope`, if any.
    ///
    /// An assignment's `roleDefinitionId` is subscription-qualified while a
    /// definition listed at tenant scope is not, so containment is compared.
    pub async fn find(
        &self,
        scope: &str,
        principal_id: &str,
        definition: &RoleDefinition,
    ) -> Result<Option<RoleAssignment>, ArmError> {
        let definition_id = definition.id.to_ascii_lowercase();
        let mut pager = self.list_for_scope(scope, principal_id)?;
        while pager.more() {
            for assignment in pager.next_page().await? {
                if assignment
                    .properties
                    .role_definition_id
                    .to_ascii_lowercase()
                    .contains(&definition_id)
                {
                    return Ok(Some(assignment));
                }
            }
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::tests::client;
    use serde_json::json;
    use wiremock::{
        matchers::{method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const READER_ID: &str = "/providers/Microsoft.Authorization/roleDefinitions/acdd72a7-3385-48ef-bd42-f606fba81ae7";

    fn definition(id: &str, name: &str) -> serde_json::Value {
        json!({ "id": id, "name": "guid", "properties": { "roleName": name, "type": "BuiltInRole" } })
    }

    #[tokio::test]
    async fn find_by_name_requires_exactly_one_match() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions"))
            .and(query_param("$filter", "roleName eq 'Reader'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [definition(READER_ID, "Reader")]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions"))
            .and(query_param("$filter", "roleName eq 'Custom'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [definition("/a", "Custom"), definition("/b", "Custom")]
            })))
            .mount(&server)
            .await;

        let defs = RoleDefinitions::new(&client(&server), "sub-1");
        assert_eq!(defs.find_by_name("Reader").await.unwrap().id, READER_ID);
        let err = defs.find_by_name("Custom").await.unwrap_err();
        assert!(matches!(err, ArmError::RoleDefinitionLookup { count: 2, .. }), "got {:?}", err);
    }

    #[tokio::test]
    async fn find_by_name_with_no_match_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [] })))
            .mount(&server)
            .await;

        let err = RoleDefinitions::new(&client(&server), "sub-1")
            .find_by_name("Nonexistent Role")
            .await
            .unwrap_err();
        assert!(matches!(err, ArmError::RoleDefinitionLookup { count: 0, .. }));
    }

    #[tokio::test]
    async fn assignment_matches_on_contained_definition_id() {
        let server = MockServer::start().await;
        let scope = "/subscriptions/sub-1/resourceGroups/rg-ext/providers/Microsoft.Compute/disks/d1";
        Mock::given(method("GET"))
            .and(path(format!("{}/providers/Microsoft.Authorization/roleAssignments", scope)))
            .and(query_param("$filter", "principalId eq 'pid-1'"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "value": [
                    { "id": "/ra/other", "properties": {
                        "roleDefinitionId": "/subscriptions/sub-1/providers/Microsoft.Authorization/roleDefinitions/other",
                        "principalId": "pid-1" } },
                    { "id": "/ra/reader", "properties": {
                        "roleDefinitionId": format!("/subscriptions/sub-1{}", READER_ID),
                        "principalId": "pid-1" } }
                ]
            })))
            .mount(&server)
            .await;

        let reader: RoleDefinition = serde_json::from_value(definition(READER_ID, "Reader")).unwrap();
        let found = RoleAssignments::new(&client(&server))
            .find(scope, "pid-1", &reader)
            .await
            .unwrap();
        assert_eq!(found.unwrap().id, "/ra/reader");
    }
}
