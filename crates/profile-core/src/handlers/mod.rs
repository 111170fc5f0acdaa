//! Request handlers (§4.C). One function per `RequestType`, grouped by the
//! area of state they touch; `handle` is the single entry point the
//! dispatcher calls once role/status/signature checks have already passed.

mod conversation;
mod hosting;
mod neighborhood;
mod profile;
mod relay;

use std::sync::Arc;

use profile_protocol::envelope::RequestType;
use profile_protocol::ProtocolError;

use crate::dispatcher::Dispatched;
use crate::session::Session;
use crate::Core;

pub async fn handle(
    core: &Core,
    session: &Arc<Session>,
    request_id: u32,
    request_type: RequestType,
    body: &[u8],
) -> Result<Dispatched, ProtocolError> {
    use RequestType::*;
    match request_type {
        Ping => conversation::ping(body).map(Dispatched::Respond),
        ListRoles => conversation::list_roles(core).map(Dispatched::Respond),
        StartConversation => conversation::start_conversation(core, session, body).await.map(Dispatched::Respond),
        CheckIn => conversation::check_in(core, session, body).await.map(Dispatched::Respond),
        VerifyIdentity => conversation::verify_identity(session, body).await.map(Dispatched::Respond),

        GetProfileInformation => profile::get_profile_information(core, body).await.map(Dispatched::Respond),
        ProfileSearch => profile::profile_search(core, session, body).await.map(Dispatched::Respond),
        ProfileSearchPart => profile::profile_search_part(session, body).map(Dispatched::Respond),
        ProfileStats => profile::profile_stats(core).await.map(Dispatched::Respond),
        GetIdentityRelationships => {
            profile::get_identity_relationships(core, body).await.map(Dispatched::Respond)
        }

        RegisterHosting => hosting::register_hosting(core, session, body).await.map(Dispatched::Respond),
        UpdateProfile => hosting::update_profile(core, session, body).await.map(Dispatched::Respond),
        CancelHostingAgreement => {
            hosting::cancel_hosting_agreement(core, session, body).await.map(Dispatched::Respond)
        }
        AppServiceAdd => hosting::app_service_add(core, session, body).await.map(Dispatched::Respond),
        AppServiceRemove => hosting::app_service_remove(core, session, body).await.map(Dispatched::Respond),
        AddRelatedIdentity => hosting::add_related_identity(core, session, body).await.map(Dispatched::Respond),
        RemoveRelatedIdentity => {
            hosting::remove_related_identity(core, session, body).await.map(Dispatched::Respond)
        }
        CanStoreData => hosting::can_store_data(body).map(Dispatched::Respond),
        CanPublishIpns => hosting::can_publish_ipns(body).map(Dispatched::Respond),

        CallIdentityApplicationService => {
            relay::call_identity_application_service(core, session, body).await.map(Dispatched::Respond)
        }
        AppServiceSendMessage => relay::app_service_send_message(core, session, body).await.map(Dispatched::Respond),

        StartNeighborhoodInit => {
            neighborhood::start_neighborhood_init(core, session, request_id, body).await
        }
        NeighborhoodSharedProfileUpdate => {
            neighborhood::ingest_shared_profile_update(core, session, body).await.map(Dispatched::Respond)
        }
        StopNeighborhoodUpdates => {
            neighborhood::stop_neighborhood_updates(core, session, body).await.map(Dispatched::Respond)
        }
        FinishNeighborhoodInit => neighborhood::finish_neighborhood_init(),

        // Enforced as server-originated-only in the dispatcher before
        // `requirements()`/`handle` are even consulted.
        IncomingCallNotification | AppServiceReceiveMessageNotification => {
            Err(ProtocolError::ProtocolViolation("this request type is server-originated only".into()))
        }
    }
}
