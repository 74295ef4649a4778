//! # Client
//!
//! Speaks the bento protocol over a TCP stream: store a function, execute it,
//! attach to the resulting instance and exchange function messages.
//!
//! Open and Close carry no success response. After `open`, the next frame is
//! either a function message or, if the open failed, an error response; callers
//! that need to tell them apart read with `recv_response` or `recv_message`
//! depending on what they expect.

use bentowire::ExecuteRequest;
use bentowire::FunctionId;
use bentowire::FunctionMessage;
use bentowire::HEADER_LEN;
use bentowire::Header;
use bentowire::RESPONSE_HEADER_LEN;
use bentowire::Request;
use bentowire::RequestKind;
use bentowire::Response;
use bentowire::ResponseHeader;
use bentowire::StoreRequest;
use tokio::io::AsyncReadExt;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::net::ToSocketAddrs;

#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    Wire(bentowire::Error),
    /// The server answered with an error response.
    Server { kind: u8, message: String },
    /// The server answered a different request kind than the one sent.
    Unexpected(Response),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::Wire(e) => write!(f, "Wire error: {}", e),
            Self::Server { kind, message } => write!(f, "Server error for request {:#x}: {}", kind, message),
            Self::Unexpected(resp) => write!(f, "Unexpected response: {:?}", resp),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<bentowire::Error> for Error {
    fn from(e: bentowire::Error) -> Self {
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub struct Client {
    stream: TcpStream,
}

impl Client {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Stores a function and returns its token.
    pub async fn store(&mut self, name: &str, code: &str) -> Result<String> {
        let request = Request::Store(StoreRequest { name: name.to_string(), code: code.to_string() });
        match self.request(&request).await? {
            Response::Store { token } => Ok(token),
            other => Err(Error::Unexpected(other)),
        }
    }

    /// Starts an instance of a stored function and returns its id.
    pub async fn execute(&mut self, call: &str, token: &str) -> Result<FunctionId> {
        let request = Request::Execute(ExecuteRequest { call: call.to_string(), token: token.to_string() });
        match self.request(&request).await? {
            Response::Execute { function_id } => Ok(FunctionId::parse(&function_id)?),
            other => Err(Error::Unexpected(other)),
        }
    }

    /// Attaches to an instance.
    pub async fn open(&mut self, function_id: &FunctionId) -> Result<()> {
        self.send(&Request::Open { function_id: function_id.to_string() }.encode()?).await
    }

    /// Detaches from an instance. Messages already in flight may still arrive.
    pub async fn close(&mut self, function_id: &FunctionId) -> Result<()> {
        self.send(&Request::Close { function_id: function_id.to_string() }.encode()?).await
    }

    pub async fn send_input(&mut self, function_id: &FunctionId, data: impl Into<Vec<u8>>) -> Result<()> {
        self.send(&FunctionMessage::input(function_id.clone(), data).encode()?).await
    }

    /// Reads the next function message.
    pub async fn recv_message(&mut self) -> Result<FunctionMessage> {
        let mut header = [0u8; HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let header = Header::decode(&header)?;
        let mut payload = vec![0u8; header.payload_len()];
        self.stream.read_exact(&mut payload).await?;
        Ok(FunctionMessage::decode(header.kind, &payload)?)
    }

    /// Reads the next response frame, error responses included.
    pub async fn recv_response(&mut self) -> Result<Response> {
        let mut header = [0u8; RESPONSE_HEADER_LEN];
        self.stream.read_exact(&mut header).await?;
        let header = ResponseHeader::decode(&header)?;
        let mut payload = vec![0u8; header.payload_len()];
        self.stream.read_exact(&mut payload).await?;
        Ok(Response::decode(&header, &payload)?)
    }

    async fn request(&mut self, request: &Request) -> Result<Response> {
        self.send(&request.encode()?).await?;
        let response = self.recv_response().await?;
        let sent: u8 = request.kind().into();
        match response {
            Response::Error { kind, message } => Err(Error::Server { kind, message }),
            resp if resp.kind() != sent => Err(Error::Unexpected(resp)),
            resp => Ok(resp),
        }
    }

    async fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }
}

impl Error {
    /// True for an error response to `kind`.
    pub fn is_server_error(&self, kind: RequestKind) -> bool {
        matches!(self, Self::Server { kind: k, .. } if *k == u8::from(kind))
    }
}
