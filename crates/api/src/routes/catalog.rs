//! Subscription catalog routes (read-only)

use axum::{extract::State, Json};
use serde::Serialize;
use uuid::Uuid;

use crate::{auth::AuthUser, error::ApiResult, state::AppState};
use membrio_shared::{Product, Subscription};

#[derive(Debug, Serialize)]
pub struct ProductResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub price: f64,
    pub tax_rate: f64,
    pub recurrent: bool,
    pub duration_days: i32,
}

#[derive(Debug, Serialize)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub products: Vec<ProductResponse>,
}

/// List subscriptions with their products
pub async fn list_subscriptions(
    State(state): State<AppState>,
    _user: AuthUser,
) -> ApiResult<Json<Vec<SubscriptionResponse>>> {
    let subscriptions: Vec<Subscription> = sqlx::query_as(
        "SELECT id, name, description, created_at FROM subscriptions ORDER BY name",
    )
    .fetch_all(&state.pool)
    .await?;

    let products: Vec<Product> = sqlx::query_as(
        r#"
        SELECT id, subscription_id, name, description, price, tax_rate,
               recurrent, duration_days, created_at
        FROM products
        ORDER BY name
        "#,
    )
    .fetch_all(&state.pool)
    .await?;

    let response = subscriptions
        .into_iter()
        .map(|sub| SubscriptionResponse {
            products: products
                .iter()
                .filter(|p| p.subscription_id == sub.id)
                .map(|p| ProductResponse {
                    id: p.id,
                    name: p.name.clone(),
                    description: p.description.clone(),
                    price: p.price,
                    tax_rate: p.tax_rate,
                    recurrent: p.recurrent,
                    duration_days: p.duration_days,
                })
                .collect(),
            id: sub.id,
            name: sub.name,
            description: sub.description,
        })
        .collect();

    Ok(Json(response))
}
