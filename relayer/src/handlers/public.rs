use crate::error::AppResult;
use crate::state::AppState;
use crate::types::FeeAndAddress;
use axum::extract::State;
use axum::Json as AxumJson;
use std::sync::Arc;

pub async fn get_fee_and_address(
    State(state): State<Arc<AppState>>,
) -> AppResult<AxumJson<FeeAndAddress>> {
    Ok(AxumJson(FeeAndAddress {
        fee: state.fee_lamports,
        address: state.ctx.payer_pubkey().to_string(),
    }))
}
