use reqwest::{Method, StatusCode};

use crate::api::client::{AuthClient, RequestExecutor, RequestOptions};
use crate::api::error::{ApiError, decode, expect_status};
use crate::models::secret::{Secret, SecretRequest};

fn secrets_route(group_id: &str, app_id: &str) -> String {
    format!("/groups/{group_id}/apps/{app_id}/secrets")
}

fn secret_route(group_id: &str, app_id: &str, secret_id: &str) -> String {
    format!("{}/{secret_id}", secrets_route(group_id, app_id))
}

impl<E: RequestExecutor> AuthClient<E> {
    pub async fn list_secrets(&self, group_id: &str, app_id: &str) -> Result<Vec<Secret>, ApiError> {
        let res = self
            .execute_request(
                Method::GET,
                &secrets_route(group_id, app_id),
                RequestOptions::default(),
            )
            .await?;
        let res = expect_status(res, StatusCode::OK, "failed to list secrets").await?;

        decode(res).await
    }

    pub async fn add_secret(
        &self,
        group_id: &str,
        app_id: &str,
        name: &str,
        value: &str,
    ) -> Result<Secret, ApiError> {
        let options = RequestOptions::json(&SecretRequest {
            id: None,
            name,
            value,
        })?;
        let res = self
            .execute_request(Method::POST, &secrets_route(group_id, app_id), options)
            .await?;
        let res = expect_status(res, StatusCode::CREATED, "failed to add secret").await?;

        decode(res).await
    }

    pub async fn update_secret(
        &self,
        group_id: &str,
        app_id: &str,
        secret_id: &str,
        name: &str,
        value: &str,
    ) -> Result<(), ApiError> {
        let options = RequestOptions::json(&SecretRequest {
            id: Some(secret_id),
            name,
            value,
        })?;
        let res = self
            .execute_request(
                Method::PUT,
                &secret_route(group_id, app_id, secret_id),
                options,
            )
            .await?;
        expect_status(res, StatusCode::NO_CONTENT, "failed to update secret").await?;
        Ok(())
    }

    pub async fn remove_secret(
        &self,
        group_id: &str,
        app_id: &str,
        secret_id: &str,
    ) -> Result<(), ApiError> {
        let res = self
            .execute_request(
                Method::DELETE,
                &secret_route(group_id, app_id, secret_id),
                RequestOptions::default(),
            )
            .await?;
        expect_status(res, StatusCode::NO_CONTENT, "failed to remove secret").await?;
        Ok(())
    }
}
