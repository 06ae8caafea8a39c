//! Ledger transport over the Aptos fullnode REST API.

use crate::{
    address::AccountAddress,
    config::{
        ReadMode,
        WatchConfig,
    },
    endpoints::Endpoint,
    error::LedgerError,
    ledger::{
        IndirectionRecord,
        LedgerTransport,
        RawGameRecord,
    },
};
use color_eyre::eyre::{
    Result,
    WrapErr,
};
use reqwest::StatusCode;
use serde::{
    Deserialize,
    Deserializer,
    Serialize,
    de::{
        DeserializeOwned,
        Error as _,
    },
};

const CREATOR_RESOURCE: &str = "CreatorData";
const GAME_RESOURCE: &str = "Game";
const RESOLVE_VIEW: &str = "get_resource_address";
const GAME_VIEW: &str = "get_game_state";
const MOVE_ABORT_MARKERS: [&str; 3] = ["vm_error_code", "ABORTED", "MISSING_DATA"];

#[derive(Clone)]
pub struct AptosTransport {
    http: reqwest::Client,
    module_path: String,
    mode: ReadMode,
}

impl AptosTransport {
    pub fn new(config: &WatchConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .wrap_err("failed to build HTTP client for ledger reads")?;
        Ok(Self {
            http,
            module_path: config.module_path(),
            mode: config.read_mode,
        })
    }

    fn resource_url(&self, endpoint: &Endpoint, account: &AccountAddress, name: &str) -> String {
        endpoint.join(&format!(
            "accounts/{account}/resource/{}::{name}",
            self.module_path
        ))
    }

    async fn get_resource(
        &self,
        endpoint: &Endpoint,
        account: &AccountAddress,
        name: &str,
    ) -> Result<Vec<u8>, LedgerError> {
        let url = self.resource_url(endpoint, account, name);
        tracing::trace!(%url, "fetching resource");
        self.send(self.http.get(url)).await
    }

    async fn call_view(
        &self,
        endpoint: &Endpoint,
        function: &str,
        argument: &AccountAddress,
    ) -> Result<Vec<u8>, LedgerError> {
        let request = ViewRequest {
            function: format!("{}::{function}", self.module_path),
            type_arguments: Vec::new(),
            arguments: vec![argument.to_string()],
        };
        tracing::trace!(function = %request.function, "calling view function");
        self.send(self.http.post(endpoint.join("view")).json(&request))
            .await
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Vec<u8>, LedgerError> {
        let res = request
            .send()
            .await
            .map_err(|err| LedgerError::Unreachable(format!("ledger request failed: {err}")))?;
        let status = res.status();
        let bytes = res.bytes().await.map_err(|err| {
            LedgerError::Unreachable(format!("failed to read ledger response body: {err}"))
        })?;
        if let Some(err) = status_error(status, &bytes) {
            return Err(err);
        }
        Ok(bytes.to_vec())
    }
}

impl LedgerTransport for AptosTransport {
    async fn resolve_indirection(
        &self,
        endpoint: &Endpoint,
        creator: &AccountAddress,
    ) -> Result<IndirectionRecord, LedgerError> {
        match self.mode {
            ReadMode::Resources => {
                let bytes = self.get_resource(endpoint, creator, CREATOR_RESOURCE).await?;
                parse_creator_resource(&bytes)
            }
            ReadMode::View => {
                let bytes = self.call_view(endpoint, RESOLVE_VIEW, creator).await?;
                parse_resolve_view(&bytes)
            }
        }
    }

    async fn read_record(
        &self,
        endpoint: &Endpoint,
        address: &AccountAddress,
    ) -> Result<RawGameRecord, LedgerError> {
        match self.mode {
            ReadMode::Resources => {
                let bytes = self.get_resource(endpoint, address, GAME_RESOURCE).await?;
                parse_game_resource(&bytes)
            }
            ReadMode::View => {
                let bytes = self.call_view(endpoint, GAME_VIEW, address).await?;
                parse_game_view(&bytes)
            }
        }
    }
}

fn status_error(status: StatusCode, body: &[u8]) -> Option<LedgerError> {
    if status.is_success() {
        return None;
    }
    let body = String::from_utf8_lossy(body);
    Some(match status {
        StatusCode::NOT_FOUND => LedgerError::NotFound,
        // a view function that aborts found nothing to read
        StatusCode::BAD_REQUEST if is_move_abort(&body) => LedgerError::NotFound,
        StatusCode::TOO_MANY_REQUESTS => LedgerError::RateLimited(format!("{status}: {body}")),
        _ => LedgerError::Unreachable(format!("ledger responded with {status}: {body}")),
    })
}

fn is_move_abort(body: &str) -> bool {
    MOVE_ABORT_MARKERS.iter().any(|marker| body.contains(marker))
}

fn decode<R: DeserializeOwned>(bytes: &[u8], what: &str) -> Result<R, LedgerError> {
    serde_json::from_slice(bytes)
        .map_err(|err| LedgerError::Unreachable(format!("invalid {what} payload: {err}")))
}

fn parse_creator_resource(bytes: &[u8]) -> Result<IndirectionRecord, LedgerError> {
    let dto: ResourceDto<CreatorDataDto> = decode(bytes, "creator resource")?;
    resolved(dto.data.resource_address)
}

fn parse_resolve_view(bytes: &[u8]) -> Result<IndirectionRecord, LedgerError> {
    let (resource_address,): (AccountAddress,) = decode(bytes, "resource address view")?;
    resolved(resource_address)
}

/// The zero address stands for "no game account yet".
fn resolved(resource_address: AccountAddress) -> Result<IndirectionRecord, LedgerError> {
    if resource_address.is_zero() {
        return Err(LedgerError::NotFound);
    }
    Ok(IndirectionRecord { resource_address })
}

fn parse_game_resource(bytes: &[u8]) -> Result<RawGameRecord, LedgerError> {
    let dto: ResourceDto<GameDataDto> = decode(bytes, "game resource")?;
    Ok(dto.data.into())
}

fn parse_game_view(bytes: &[u8]) -> Result<RawGameRecord, LedgerError> {
    let (creator, total_deposit, ticket_price, timer_end, last_buyer, started): GameViewDto =
        decode(bytes, "game state view")?;
    Ok(RawGameRecord {
        creator,
        total_deposit: total_deposit.0,
        ticket_price: ticket_price.0,
        timer_end: timer_end.0,
        last_buyer: last_buyer.into_address(),
        started,
        declared_winner: None,
    })
}

#[derive(Serialize)]
struct ViewRequest {
    function: String,
    type_arguments: Vec<String>,
    arguments: Vec<String>,
}

#[derive(Deserialize)]
struct ResourceDto<D> {
    data: D,
}

#[derive(Deserialize)]
struct CreatorDataDto {
    resource_address: AccountAddress,
}

#[derive(Deserialize)]
struct GameDataDto {
    #[serde(default)]
    creator: Option<AccountAddress>,
    total_deposit: MoveU64,
    ticket_price: MoveU64,
    timer_end: MoveU64,
    #[serde(default)]
    last_buyer: Option<MoveAddressDto>,
    started: bool,
    #[serde(default)]
    winner: Option<MoveAddressDto>,
}

impl From<GameDataDto> for RawGameRecord {
    fn from(dto: GameDataDto) -> Self {
        RawGameRecord {
            creator: dto.creator.unwrap_or(AccountAddress::ZERO),
            total_deposit: dto.total_deposit.0,
            ticket_price: dto.ticket_price.0,
            timer_end: dto.timer_end.0,
            last_buyer: dto.last_buyer.and_then(MoveAddressDto::into_address),
            started: dto.started,
            declared_winner: dto
                .winner
                .and_then(MoveAddressDto::into_address)
                .filter(|winner| !winner.is_zero()),
        }
    }
}

type GameViewDto = (AccountAddress, MoveU64, MoveU64, MoveU64, MoveAddressDto, bool);

/// Move `u64`, which the REST API renders as a decimal string.
#[derive(Deserialize)]
struct MoveU64(#[serde(deserialize_with = "string_or_number")] u64);

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Number(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Number(n) => Ok(n),
        Raw::Text(text) => text
            .parse()
            .map_err(|_| D::Error::custom(format!("`{text}` is not a u64"))),
    }
}

/// An address field that may also be wrapped in a Move `Option` or struct.
#[derive(Deserialize)]
#[serde(untagged)]
enum MoveAddressDto {
    Plain(AccountAddress),
    Optional { vec: Vec<AccountAddress> },
    Wrapped { address: AccountAddress },
}

impl MoveAddressDto {
    fn into_address(self) -> Option<AccountAddress> {
        match self {
            MoveAddressDto::Plain(address) | MoveAddressDto::Wrapped { address } => Some(address),
            MoveAddressDto::Optional { vec } => vec.into_iter().next(),
        }
    }
}
