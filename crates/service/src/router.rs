use std::net::SocketAddr;

use bytes::BytesMut;
use codec::{
    DecodeResult, Decoder,
    message::{
        Message, MessageEncoder,
        attributes::{
            ChannelNumber, ErrorBody, ErrorCode, ErrorType, Lifetime, MappedAddress, Nonce, Realm,
            RequestedTransport, ResponseOrigin, Software, XorMappedAddress, XorPeerAddress,
            XorRelayedAddress,
        },
        methods::*,
    },
};
use log::warn;

use crate::{Service, auth, session::Identifier};

/// Bytes ready to be sent back to the client over whatever transport
/// delivered the request that produced them.
#[derive(Debug)]
pub struct RouteOutcome<'a> {
    pub bytes: &'a [u8],
}

struct Ctx<'a> {
    service: &'a Service,
    interface: SocketAddr,
}

/// Demultiplexes STUN/TURN messages and ChannelData frames arriving on one
/// listening interface, dispatching each to the allocation manager shared
/// across the whole server.
pub struct Router {
    service: Service,
    interface: SocketAddr,
    decoder: Decoder,
    bytes: BytesMut,
}

impl Router {
    pub fn new(service: Service, interface: SocketAddr) -> Self {
        Self {
            service,
            interface,
            decoder: Decoder::default(),
            bytes: BytesMut::with_capacity(1500),
        }
    }

    pub async fn route<'a, 'b: 'a>(
        &'b mut self,
        bytes: &'b [u8],
        source: SocketAddr,
    ) -> Option<RouteOutcome<'a>> {
        let id = Identifier {
            source,
            interface: self.interface,
        };

        let ctx = Ctx {
            service: &self.service,
            interface: self.interface,
        };

        match self.decoder.decode(bytes) {
            Ok(DecodeResult::ChannelData(frame)) => {
                channel_data(&ctx, &id, frame).await;
                None
            }
            Ok(DecodeResult::Message(message)) => {
                let method = message.method();
                let out = &mut self.bytes;

                match method {
                    BINDING_REQUEST => binding(&ctx, &id, &message, out),
                    ALLOCATE_REQUEST => allocate(&ctx, &id, &message, out).await,
                    CREATE_PERMISSION_REQUEST => {
                        create_permission(&ctx, &id, &message, out).await
                    }
                    CHANNEL_BIND_REQUEST => channel_bind(&ctx, &id, &message, out).await,
                    REFRESH_REQUEST => refresh(&ctx, &id, &message, out).await,
                    SEND_INDICATION => {
                        send_indication(&ctx, &id, &message).await;
                        None
                    }
                    _ => None,
                }
            }
            Err(_) => None,
        }
    }
}

/// Builds an error response, logging resource-exhaustion and
/// authentication failures (malformed-wire and policy rejections are not
/// logged beyond this).
fn reject<'a>(
    ctx: &Ctx<'_>,
    id: &Identifier,
    message: &Message<'_>,
    error: ErrorType,
    out: &'a mut BytesMut,
) -> Option<RouteOutcome<'a>> {
    let method = message.method().error()?;

    if matches!(error, ErrorType::Unauthorized | ErrorType::InsufficientCapacity) {
        warn!("{:?} from {} rejected: {:?}", message.method(), id.source, error);
    }

    let nonce = auth::fresh_nonce();

    {
        let mut encoder = MessageEncoder::extend(method, message, out);
        encoder.append::<ErrorCode>(ErrorBody::from(error));
        encoder.append::<Nonce>(&nonce);
        encoder.append::<Realm>(&ctx.service.realm);
        encoder.append::<Software>(&ctx.service.software);
        encoder.flush(None).ok()?;
    }

    Some(RouteOutcome { bytes: out })
}

fn binding<'a>(
    ctx: &Ctx<'_>,
    id: &Identifier,
    message: &Message<'_>,
    out: &'a mut BytesMut,
) -> Option<RouteOutcome<'a>> {
    {
        let mut encoder = MessageEncoder::extend(BINDING_RESPONSE, message, out);
        encoder.append::<XorMappedAddress>(id.source);
        encoder.append::<MappedAddress>(id.source);
        encoder.append::<ResponseOrigin>(ctx.interface);
        encoder.append::<Software>(&ctx.service.software);
        encoder.flush(None).ok()?;
    }

    Some(RouteOutcome { bytes: out })
}

async fn allocate<'a>(
    ctx: &Ctx<'_>,
    id: &Identifier,
    message: &Message<'_>,
    out: &'a mut BytesMut,
) -> Option<RouteOutcome<'a>> {
    let Some(transport) = message.get::<RequestedTransport>() else {
        return reject(ctx, id, message, ErrorType::BadRequest, out);
    };

    if transport != 17 {
        return reject(ctx, id, message, ErrorType::UnsupportedTransportProtocol, out);
    }

    let (username, password) = match auth::authenticate(message, &ctx.service.turn_secret, &ctx.service.realm) {
        Ok(pair) => pair,
        Err(_) => return reject(ctx, id, message, ErrorType::Unauthorized, out),
    };

    let lifetime = ctx.service.allocations.lifetime_bounds.clamp(message.get::<Lifetime>());

    let allocation = match ctx
        .service
        .allocations
        .allocate(*id, username.to_string(), password.clone(), lifetime)
        .await
    {
        Ok(allocation) => allocation,
        Err(crate::Error::AllocationMismatch) => {
            return reject(ctx, id, message, ErrorType::AllocationMismatch, out);
        }
        Err(_) => return reject(ctx, id, message, ErrorType::InsufficientCapacity, out),
    };

    {
        let mut encoder = MessageEncoder::extend(ALLOCATE_RESPONSE, message, out);
        encoder.append::<XorRelayedAddress>(SocketAddr::new(
            ctx.service.external_ip,
            allocation.relay_port,
        ));
        encoder.append::<XorMappedAddress>(id.source);
        encoder.append::<Lifetime>(lifetime.as_secs() as u32);
        encoder.append::<Software>(&ctx.service.software);
        encoder.flush(Some(&allocation.password)).ok()?;
    }

    Some(RouteOutcome { bytes: out })
}

async fn create_permission<'a>(
    ctx: &Ctx<'_>,
    id: &Identifier,
    message: &Message<'_>,
    out: &'a mut BytesMut,
) -> Option<RouteOutcome<'a>> {
    let (_, password) = match auth::authenticate(message, &ctx.service.turn_secret, &ctx.service.realm) {
        Ok(pair) => pair,
        Err(_) => return reject(ctx, id, message, ErrorType::Unauthorized, out),
    };

    let Some(allocation) = ctx.service.allocations.get(id) else {
        return reject(ctx, id, message, ErrorType::AllocationMismatch, out);
    };

    let peers: Vec<SocketAddr> = message.get_all::<XorPeerAddress>().collect();
    if peers.is_empty() {
        return reject(ctx, id, message, ErrorType::BadRequest, out);
    }

    for peer in peers {
        allocation.install_permission(peer.ip());
    }

    {
        MessageEncoder::extend(CREATE_PERMISSION_RESPONSE, message, out)
            .flush(Some(&password))
            .ok()?;
    }

    Some(RouteOutcome { bytes: out })
}

async fn channel_bind<'a>(
    ctx: &Ctx<'_>,
    id: &Identifier,
    message: &Message<'_>,
    out: &'a mut BytesMut,
) -> Option<RouteOutcome<'a>> {
    let (_, password) = match auth::authenticate(message, &ctx.service.turn_secret, &ctx.service.realm) {
        Ok(pair) => pair,
        Err(_) => return reject(ctx, id, message, ErrorType::Unauthorized, out),
    };

    let Some(allocation) = ctx.service.allocations.get(id) else {
        return reject(ctx, id, message, ErrorType::AllocationMismatch, out);
    };

    let Some(peer) = message.get::<XorPeerAddress>() else {
        return reject(ctx, id, message, ErrorType::BadRequest, out);
    };

    let Some(channel) = message.get::<ChannelNumber>() else {
        return reject(ctx, id, message, ErrorType::BadRequest, out);
    };

    if !(0x4000..=0x7FFF).contains(&channel) {
        return reject(ctx, id, message, ErrorType::BadRequest, out);
    }

    if allocation.bind_channel(channel, peer).is_err() {
        return reject(ctx, id, message, ErrorType::BadRequest, out);
    }

    {
        MessageEncoder::extend(CHANNEL_BIND_RESPONSE, message, out)
            .flush(Some(&password))
            .ok()?;
    }

    Some(RouteOutcome { bytes: out })
}

async fn refresh<'a>(
    ctx: &Ctx<'_>,
    id: &Identifier,
    message: &Message<'_>,
    out: &'a mut BytesMut,
) -> Option<RouteOutcome<'a>> {
    let (_, password) = match auth::authenticate(message, &ctx.service.turn_secret, &ctx.service.realm) {
        Ok(pair) => pair,
        Err(_) => return reject(ctx, id, message, ErrorType::Unauthorized, out),
    };

    let lifetime = ctx.service.allocations.lifetime_bounds.clamp_refresh(message.get::<Lifetime>());

    let Some(applied) = ctx.service.allocations.refresh(id, lifetime) else {
        return reject(ctx, id, message, ErrorType::AllocationMismatch, out);
    };

    {
        let mut encoder = MessageEncoder::extend(REFRESH_RESPONSE, message, out);
        encoder.append::<Lifetime>(applied.as_secs() as u32);
        encoder.flush(Some(&password)).ok()?;
    }

    Some(RouteOutcome { bytes: out })
}

/// Send indication: client → peer. Authenticated the same as every other
/// stateful TURN method, even though RFC 5766 lets indications skip
/// integrity — silently dropped (no response, no relay) on auth failure,
/// malformed attributes, or no permission installed for this peer (Send
/// never installs one on its own).
async fn send_indication(ctx: &Ctx<'_>, id: &Identifier, message: &Message<'_>) {
    if auth::authenticate(message, &ctx.service.turn_secret, &ctx.service.realm).is_err() {
        return;
    }

    let Some(peer) = message.get::<XorPeerAddress>() else {
        return;
    };

    let Some(data) = message.get::<codec::message::attributes::Data>() else {
        return;
    };

    let Some(allocation) = ctx.service.allocations.get(id) else {
        return;
    };

    if !allocation.has_permission(peer.ip()) {
        return;
    }

    let _ = allocation.relay_socket.send_to(data, peer).await;
}

/// ChannelData: client → peer over an already-bound channel.
async fn channel_data(ctx: &Ctx<'_>, id: &Identifier, frame: codec::channel_data::ChannelData<'_>) {
    let Some(allocation) = ctx.service.allocations.get(id) else {
        return;
    };

    let Some(peer) = allocation.peer_for_channel(frame.number()) else {
        return;
    };

    let _ = allocation.relay_socket.send_to(frame.as_bytes(), peer).await;
}
