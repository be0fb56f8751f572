//! Payment provider webhook handlers.
//!
//! The provider retries webhook deliveries on any non-2xx response, so business outcomes
//! (duplicates, unknown payments, failed recharges) are always acknowledged with a 200 and a
//! [`JsonResponse`] body. The only non-200 responses are for malformed requests and signature
//! failures, where a redelivery of the same payload could actually succeed or must be refused.

use actix_web::{web, HttpRequest, HttpResponse};
use log::*;
use recharge_engine::{
    db_types::PaymentEvent, EventOutcome, GatewayDatabase, GatewayProvider, OrderFlowApi,
};

use crate::{
    config::WebhookAuth,
    data_objects::{JsonResponse, ProviderPaymentEvent},
    errors::ServerError,
    route,
};

const SIGNATURE_HEADER: &str = "X-Rgw-Signature";

route!(payment_webhook => Post "/webhook/payment" impl GatewayDatabase, GatewayProvider);
pub async fn payment_webhook<B, P>(
    req: HttpRequest,
    body: web::Bytes,
    api: web::Data<OrderFlowApi<B, P>>,
    auth: web::Data<WebhookAuth>,
) -> Result<HttpResponse, ServerError>
where
    B: GatewayDatabase + 'static,
    P: GatewayProvider + 'static,
{
    if auth.enabled {
        verify_signature(&req, &body, &auth)?;
    }
    let payload = serde_json::from_slice::<ProviderPaymentEvent>(&body).map_err(|e| {
        warn!("💳️ Could not deserialize webhook payload. {e}");
        ServerError::CouldNotDeserializePayload
    })?;
    let external_id = payload.id.clone();
    let event_type = payload.event_type.clone();
    debug!("💳️ Payment webhook received. id: {external_id}, type: {event_type}, status: {}", payload.status);
    let event = PaymentEvent::try_from(payload)?;
    match api.handle_payment_event(event).await {
        Ok(outcome) => Ok(HttpResponse::Ok().json(outcome_response(&external_id, outcome))),
        Err(e) => {
            // Acknowledge so the provider does not hammer us with redeliveries of a payload we
            // have already recorded as far as we could.
            error!("💳️ Error handling payment event {external_id}: {e}");
            Ok(HttpResponse::Ok().json(JsonResponse::failure(format!("Error handling payment event: {e}"))))
        },
    }
}

fn outcome_response(external_id: &str, outcome: EventOutcome) -> JsonResponse {
    match outcome {
        EventOutcome::Fulfilled(order) => {
            info!("💳️ Payment {external_id} approved and order {} fulfilled", order.order_number);
            JsonResponse::success(format!("Order {} fulfilled", order.order_number))
        },
        EventOutcome::RechargePending(order) => {
            info!("💳️ Payment {external_id} approved. Recharge for order {} is pending retry", order.order_number);
            JsonResponse::success(format!("Order {} accepted, recharge pending", order.order_number))
        },
        EventOutcome::RechargeFailed(order) => {
            warn!("💳️ Payment {external_id} approved but recharge for order {} failed", order.order_number);
            JsonResponse::failure(format!("Recharge for order {} failed", order.order_number))
        },
        EventOutcome::Annulled(order) => {
            info!("💳️ Payment {external_id} annulled order {}", order.order_number);
            JsonResponse::success(format!("Order {} annulled", order.order_number))
        },
        EventOutcome::Refunded(order) => {
            info!("💳️ Payment {external_id} refunded order {}", order.order_number);
            JsonResponse::success(format!("Order {} refunded", order.order_number))
        },
        EventOutcome::DisputeRecorded => {
            info!("💳️ Dispute recorded for payment {external_id}");
            JsonResponse::success("Dispute recorded")
        },
        EventOutcome::Duplicate => {
            debug!("💳️ Duplicate event for payment {external_id} acknowledged");
            JsonResponse::success("Event already processed")
        },
        EventOutcome::UnknownPayment => {
            warn!("💳️ Event for unknown payment {external_id} acknowledged");
            JsonResponse::success("Unknown payment acknowledged")
        },
        EventOutcome::Ignored => {
            debug!("💳️ Event for payment {external_id} ignored");
            JsonResponse::success("Event ignored")
        },
    }
}

fn verify_signature(req: &HttpRequest, body: &[u8], auth: &WebhookAuth) -> Result<(), ServerError> {
    let provided = req
        .headers()
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            warn!("💳️ Webhook request rejected: missing {SIGNATURE_HEADER} header");
            ServerError::InvalidSignature
        })?;
    let expected = recharge_client::sign_payload(auth.secret.reveal(), body);
    if provided != expected {
        warn!("💳️ Webhook request rejected: signature mismatch");
        return Err(ServerError::InvalidSignature);
    }
    Ok(())
}
