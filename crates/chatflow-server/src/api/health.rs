use axum::Json;
use serde::Serialize;

#[derive(Serialize)]
pub struct Health {
    status: String,
}

#[derive(Serialize)]
pub struct Greeting {
    message: String,
}

pub async fn health() -> Json<Health> {
    Json(Health {
        status: "chatflow is working!".to_string(),
    })
}

pub async fn hi() -> Json<Greeting> {
    Json(Greeting {
        message: "Hello from ChatFlow!".to_string(),
    })
}
