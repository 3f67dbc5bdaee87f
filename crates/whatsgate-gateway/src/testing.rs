//! Scripted protocol client and media fixtures for unit tests.

use std::io::Cursor;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use image::codecs::gif::GifEncoder;
use image::{Delay, Frame, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use tokio::sync::mpsc;
use whatsgate_media::{Converter, MediaConfig};
use whatsgate_shared::Jid;
use whatsgate_store::DeviceRecord;

use crate::config::GatewayConfig;
use crate::gateway::Gateway;
use crate::protocol::*;

pub const OWN_JID: &str = "5550000:1@s.whatsapp.net";

pub fn test_converter(dir: &Path) -> Converter {
    Converter::new(MediaConfig {
        temp_dir: dir.to_path_buf(),
        ..MediaConfig::default()
    })
}

/// A gateway over an in-memory store, handing out [`FakeClient`]s.
pub fn test_gateway(factory: Arc<FakeFactory>, dir: &Path) -> Gateway {
    let config = GatewayConfig {
        db_path: dir.join("test.db"),
        temp_dir: Some(dir.to_path_buf()),
        ..GatewayConfig::default()
    };
    Gateway::from_parts(
        config,
        whatsgate_store::Database::open_in_memory().unwrap(),
        test_converter(dir),
        factory,
    )
    .unwrap()
}

pub fn png_bytes(width: u32, height: u32) -> Vec<u8> {
    let img = RgbImage::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 128]));
    let mut out = Vec::new();
    img.write_to(&mut Cursor::new(&mut out), ImageFormat::Png).unwrap();
    out
}

pub fn gif_bytes(frames: usize, delay_ms: u32) -> Vec<u8> {
    let mut out = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut out);
        let frames = (0..frames).map(|idx| {
            let red = ((idx * 80) % 256) as u8;
            let rgba = RgbaImage::from_pixel(2, 2, Rgba([red, 0, 0, 255]));
            Frame::from_parts(rgba, 0, 0, Delay::from_numer_denom_ms(delay_ms, 1))
        });
        encoder.encode_frames(frames).unwrap();
    }
    out
}

// ---------------------------------------------------------------------------
// Fake client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub enum PictureMode {
    #[default]
    Set,
    NotSet,
    Unauthorized,
    Broken,
}

#[derive(Default)]
struct FakeState {
    device_id: Option<Jid>,
    push_name: String,
    connected: bool,
    connect_failures: u32,
    already_connected: bool,
    connect_attempts: u32,
    next_id: u32,
    calls: Vec<String>,
    sent: Vec<(Jid, ProtoMessage, SendExtra)>,
    uploads: Vec<MediaKind>,
    qr_tx: Option<mpsc::Sender<QrEvent>>,
    events: Option<mpsc::Sender<RawEvent>>,
    contacts: Vec<(Jid, ContactInfo)>,
    groups: Vec<GroupInfo>,
    on_whatsapp: Vec<OnWhatsAppResponse>,
    picture: PictureMode,
}

#[derive(Default)]
pub struct FakeClient {
    state: Mutex<FakeState>,
}

impl FakeClient {
    pub fn paired() -> Self {
        let client = Self::default();
        {
            let mut s = client.lock();
            s.device_id = Some(Jid::parse(OWN_JID).unwrap());
            s.push_name = "Me".into();
        }
        client
    }

    pub fn unpaired() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: impl Into<String>) {
        self.lock().calls.push(call.into());
    }

    pub fn fail_connects(&self, n: u32) {
        self.lock().connect_failures = n;
    }

    pub fn set_already_connected(&self) {
        self.lock().already_connected = true;
    }

    pub fn connect_attempts(&self) -> u32 {
        self.lock().connect_attempts
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn sent(&self) -> Vec<(Jid, ProtoMessage, SendExtra)> {
        self.lock().sent.clone()
    }

    pub fn uploads(&self) -> Vec<MediaKind> {
        self.lock().uploads.clone()
    }

    pub fn set_device_id(&self, jid: Option<Jid>) {
        self.lock().device_id = jid;
    }

    pub fn set_push_name(&self, name: &str) {
        self.lock().push_name = name.into();
    }

    pub fn set_contacts(&self, contacts: Vec<(Jid, ContactInfo)>) {
        self.lock().contacts = contacts;
    }

    pub fn set_groups(&self, groups: Vec<GroupInfo>) {
        self.lock().groups = groups;
    }

    pub fn set_on_whatsapp(&self, resp: Vec<OnWhatsAppResponse>) {
        self.lock().on_whatsapp = resp;
    }

    pub fn set_picture(&self, mode: PictureMode) {
        self.lock().picture = mode;
    }

    /// Sender for pairing codes, available once a QR channel was requested.
    pub fn qr_sender(&self) -> Option<mpsc::Sender<QrEvent>> {
        self.lock().qr_tx.clone()
    }

    /// Deliver a raw event as if it came from the server.
    pub async fn emit(&self, event: RawEvent) {
        let tx = self.lock().events.clone();
        if let Some(tx) = tx {
            tx.send(event).await.unwrap();
        }
    }
}

#[async_trait]
impl ProtocolClient for FakeClient {
    fn device_id(&self) -> Option<Jid> {
        self.lock().device_id.clone()
    }

    fn push_name(&self) -> String {
        self.lock().push_name.clone()
    }

    fn credentials(&self) -> Vec<u8> {
        b"keys".to_vec()
    }

    fn is_connected(&self) -> bool {
        self.lock().connected
    }

    fn generate_message_id(&self) -> String {
        let mut s = self.lock();
        s.next_id += 1;
        format!("3EB0{:04}", s.next_id)
    }

    async fn connect(&self) -> Result<(), ClientError> {
        let mut s = self.lock();
        s.connect_attempts += 1;
        s.calls.push("connect".into());
        if s.already_connected {
            return Err(ClientError::AlreadyConnected);
        }
        if s.connect_failures > 0 {
            s.connect_failures -= 1;
            return Err(ClientError::Request("connection refused".into()));
        }
        s.connected = true;
        Ok(())
    }

    async fn disconnect(&self) {
        let mut s = self.lock();
        s.connected = false;
        s.qr_tx = None;
        s.calls.push("disconnect".into());
    }

    async fn logout(&self) -> Result<(), ClientError> {
        let mut s = self.lock();
        s.connected = false;
        s.calls.push("logout".into());
        Ok(())
    }

    async fn qr_channel(&self) -> Result<mpsc::Receiver<QrEvent>, ClientError> {
        let (tx, rx) = mpsc::channel(8);
        let mut s = self.lock();
        s.qr_tx = Some(tx);
        s.calls.push("qr_channel".into());
        Ok(rx)
    }

    async fn pair_phone(&self, phone: &str) -> Result<String, ClientError> {
        self.record(format!("pair_phone:{phone}"));
        Ok("ABCD-1234".into())
    }

    async fn send_message(
        &self,
        to: &Jid,
        message: ProtoMessage,
        extra: SendExtra,
    ) -> Result<(), ClientError> {
        let mut s = self.lock();
        s.calls.push(format!("send_message:{to}"));
        s.sent.push((to.clone(), message, extra));
        Ok(())
    }

    async fn download(&self, media: &MediaPayload) -> Result<Vec<u8>, ClientError> {
        if media.url == "fail" {
            return Err(ClientError::Request("download failed".into()));
        }
        Ok(media.url.clone().into_bytes())
    }

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadResponse, ClientError> {
        self.lock().uploads.push(kind);
        Ok(UploadResponse {
            url: "https://mmg.example/upload".into(),
            direct_path: "/v/upload".into(),
            media_key: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_sha256: blake3::hash(data).as_bytes().to_vec(),
            file_length: data.len() as u64,
        })
    }

    async fn send_chat_presence(&self, jid: &Jid, state: ChatPresence) -> Result<(), ClientError> {
        self.record(format!("chat_presence:{jid}:{state:?}"));
        Ok(())
    }

    async fn mark_read(
        &self,
        ids: &[String],
        timestamp: DateTime<Utc>,
        chat: &Jid,
        sender: Option<&Jid>,
    ) -> Result<(), ClientError> {
        let sender = sender.map(ToString::to_string).unwrap_or_default();
        self.record(format!(
            "mark_read:{}:{}:{chat}:{sender}",
            ids.join(","),
            timestamp.timestamp()
        ));
        Ok(())
    }

    async fn send_presence(&self, available: bool) -> Result<(), ClientError> {
        self.record(format!("send_presence:{available}"));
        Ok(())
    }

    async fn set_status_message(&self, status: &str) -> Result<(), ClientError> {
        self.record(format!("status:{status}"));
        Ok(())
    }

    async fn fetch_app_state(&self, name: &str) -> Result<(), ClientError> {
        self.record(format!("fetch_app_state:{name}"));
        Ok(())
    }

    async fn contacts(&self) -> Result<Vec<(Jid, ContactInfo)>, ClientError> {
        Ok(self.lock().contacts.clone())
    }

    async fn subscribe_presence(&self, jid: &Jid) -> Result<(), ClientError> {
        self.record(format!("subscribe:{jid}"));
        Ok(())
    }

    async fn is_on_whatsapp(&self, phones: &[String]) -> Result<Vec<OnWhatsAppResponse>, ClientError> {
        self.record(format!("is_on_whatsapp:{}", phones.join(",")));
        Ok(self.lock().on_whatsapp.clone())
    }

    async fn joined_groups(&self) -> Result<Vec<GroupInfo>, ClientError> {
        Ok(self.lock().groups.clone())
    }

    async fn create_group(&self, name: &str, participants: &[Jid]) -> Result<GroupInfo, ClientError> {
        self.record(format!("create_group:{name}"));
        Ok(GroupInfo {
            jid: Jid::new("120363-1", "g.us"),
            name: name.into(),
            participants: participants
                .iter()
                .map(|jid| ParticipantInfo {
                    jid: jid.clone(),
                    ..ParticipantInfo::default()
                })
                .collect(),
            ..GroupInfo::default()
        })
    }

    async fn leave_group(&self, jid: &Jid) -> Result<(), ClientError> {
        self.record(format!("leave_group:{jid}"));
        Ok(())
    }

    async fn set_group_name(&self, jid: &Jid, name: &str) -> Result<(), ClientError> {
        self.record(format!("group_name:{jid}:{name}"));
        Ok(())
    }

    async fn set_group_topic(&self, jid: &Jid, topic: &str) -> Result<(), ClientError> {
        self.record(format!("group_topic:{jid}:{topic}"));
        Ok(())
    }

    async fn update_participants(
        &self,
        group: &Jid,
        participants: &[Jid],
        change: ParticipantChange,
    ) -> Result<Vec<ParticipantInfo>, ClientError> {
        self.record(format!("participants:{group}:{change:?}"));
        Ok(participants
            .iter()
            .map(|jid| ParticipantInfo {
                jid: jid.clone(),
                is_admin: change == ParticipantChange::Promote,
                ..ParticipantInfo::default()
            })
            .collect())
    }

    async fn profile_picture(
        &self,
        jid: &Jid,
        existing_id: &str,
    ) -> Result<Option<PictureInfo>, ClientError> {
        let mode = self.lock().picture;
        match mode {
            PictureMode::Set if existing_id == "PIC1" => Ok(None),
            PictureMode::Set => Ok(Some(PictureInfo {
                id: "PIC1".into(),
                url: format!("https://pps.example/{}", jid.user),
            })),
            PictureMode::NotSet => Err(ClientError::ProfilePictureNotSet),
            PictureMode::Unauthorized => Err(ClientError::ProfilePictureUnauthorized),
            PictureMode::Broken => Err(ClientError::Request("server error".into())),
        }
    }

    async fn set_photo(&self, jid: Option<&Jid>, data: Option<Vec<u8>>) -> Result<String, ClientError> {
        let target = jid.map(ToString::to_string).unwrap_or_default();
        let len = data.map(|d| d.len()).unwrap_or_default();
        self.record(format!("set_photo:{target}:{len}"));
        Ok("PIC2".into())
    }
}

// ---------------------------------------------------------------------------
// Fake factory
// ---------------------------------------------------------------------------

/// Hands out [`FakeClient`]s and keeps them for inspection.
#[derive(Default)]
pub struct FakeFactory {
    clients: Mutex<Vec<Arc<FakeClient>>>,
    connect_failures: Mutex<u32>,
}

impl FakeFactory {
    /// The most recently created client.
    pub fn last(&self) -> Arc<FakeClient> {
        self.clients.lock().unwrap().last().cloned().unwrap()
    }

    pub fn created(&self) -> usize {
        self.clients.lock().unwrap().len()
    }

    /// Make the next client refuse its first `n` connects.
    pub fn fail_connects(&self, n: u32) {
        *self.connect_failures.lock().unwrap() = n;
    }
}

impl ClientFactory for FakeFactory {
    fn create(
        &self,
        device: &DeviceRecord,
        _platform: &str,
        events: mpsc::Sender<RawEvent>,
    ) -> Arc<dyn ProtocolClient> {
        let client = Arc::new(FakeClient::unpaired());
        {
            let mut s = client.lock();
            s.device_id = device.jid.clone();
            s.push_name = device.push_name.clone();
            s.events = Some(events);
            s.connect_failures = std::mem::take(&mut *self.connect_failures.lock().unwrap());
        }
        self.clients.lock().unwrap().push(client.clone());
        client
    }
}
