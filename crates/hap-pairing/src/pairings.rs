//! `/pairings` management: add, remove and list controllers.
//!
//! Only available on a verified session whose controller is an admin.

use crate::context::PairingContext;
use crate::identity::{parse_pairing_id, PairedClient};
use crate::protocol::{error_reply, Method};
use hap_core::error::{PairingError, Result};
use hap_crypto::tlv::{encode_list, Tlv8, TlvType};
use tracing::info;
use uuid::Uuid;

/// Handle one `/pairings` request from `controller_id`.
pub async fn handle_pairings(context: &PairingContext, controller_id: &Uuid, body: &[u8]) -> Vec<u8> {
    let request = Tlv8::decode(body);
    match process(context, controller_id, &request).await {
        Ok(reply) => reply,
        Err(err) => error_reply("pairings", 2, &err),
    }
}

async fn process(context: &PairingContext, controller_id: &Uuid, request: &Tlv8) -> Result<Vec<u8>> {
    match request.state() {
        Some(1) => {}
        Some(actual) => return Err(PairingError::StateMismatch { expected: 1, actual }.into()),
        None => return Err(PairingError::MissingTlv(TlvType::State as u8).into()),
    }

    // Permissions are checked against the current list, not the list at verify time.
    let caller = context
        .client(controller_id)
        .await
        .ok_or_else(|| PairingError::UnknownController(controller_id.to_string()))?;
    if !caller.is_admin() {
        return Err(PairingError::NotAdmin.into());
    }

    let method = request
        .method()
        .ok_or(PairingError::MissingTlv(TlvType::Method as u8))?;
    match Method::from_byte(method) {
        Some(Method::AddPairing) => add(context, request).await,
        Some(Method::RemovePairing) => remove(context, request).await,
        Some(Method::ListPairings) => list(context).await,
        _ => Err(PairingError::UnsupportedMethod(method).into()),
    }
}

fn ok_reply() -> Vec<u8> {
    Tlv8::new().with(TlvType::State, [2]).encode()
}

async fn add(context: &PairingContext, request: &Tlv8) -> Result<Vec<u8>> {
    let id = parse_pairing_id(request.require(TlvType::Identifier, "identifier")?)?;
    let public_key: [u8; 32] = request
        .require(TlvType::PublicKey, "public key")?
        .try_into()
        .map_err(|_| PairingError::Protocol("controller key must be 32 bytes".to_string()))?;
    let permissions = request
        .require(TlvType::Permissions, "permissions")?
        .first()
        .copied()
        .unwrap_or_default();

    context
        .upsert_client(PairedClient::new(id, public_key, permissions))
        .await?;
    info!(controller = %id, permissions, "pairing added");
    Ok(ok_reply())
}

async fn remove(context: &PairingContext, request: &Tlv8) -> Result<Vec<u8>> {
    let id = parse_pairing_id(request.require(TlvType::Identifier, "identifier")?)?;
    if context.remove_client(&id).await?.is_some() {
        info!(controller = %id, "pairing removed");
    }
    Ok(ok_reply())
}

async fn list(context: &PairingContext) -> Result<Vec<u8>> {
    let clients = context.clients().await;
    let mut entries: Vec<Tlv8> = clients
        .iter()
        .enumerate()
        .map(|(i, client)| {
            // The state leads the first entry only.
            let entry = if i == 0 {
                Tlv8::new().with(TlvType::State, [2])
            } else {
                Tlv8::new()
            };
            entry
                .with(TlvType::Identifier, client.pairing_id().into_bytes())
                .with(TlvType::PublicKey, client.public_key.to_vec())
                .with(TlvType::Permissions, [client.permissions])
        })
        .collect();

    if entries.is_empty() {
        entries.push(Tlv8::new().with(TlvType::State, [2]));
    }
    Ok(encode_list(&entries))
}
