//! Method and status codes carried in the frame header.

use std::fmt;

/// Request methods understood by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Method {
    /// List every song in the index.
    ListSongs = 0,
    /// List every album in the index.
    ListAlbums = 1,
    /// Metadata for one album.
    AlbumDetails = 2,
    /// Batch of thumbnail renditions.
    Thumbnail = 3,
    /// Batch of full-size cover renditions.
    Cover = 4,
    /// Stream a transcoded song.
    Transcode = 5,
    /// Fetch a static asset.
    GetFile = 6,
    /// Stop a running transcode.
    CancelTranscode = 7,
}

impl Method {
    /// All methods, in code order.
    pub const ALL: [Method; 8] = [
        Method::ListSongs,
        Method::ListAlbums,
        Method::AlbumDetails,
        Method::Thumbnail,
        Method::Cover,
        Method::Transcode,
        Method::GetFile,
        Method::CancelTranscode,
    ];

    /// Returns the wire code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Returns true if the reply is a stream of frames rather than one frame.
    pub fn is_streaming(self) -> bool {
        matches!(self, Method::Transcode)
    }
}

impl TryFrom<u32> for Method {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Method::ALL.get(code as usize).copied().ok_or(code)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::ListSongs => "LIST_SONGS",
            Method::ListAlbums => "LIST_ALBUMS",
            Method::AlbumDetails => "ALBUM_DETAILS",
            Method::Thumbnail => "THUMBNAIL",
            Method::Cover => "COVER",
            Method::Transcode => "TRANSCODE",
            Method::GetFile => "GET_FILE",
            Method::CancelTranscode => "CANCEL_TRANSCODE",
        };
        f.write_str(name)
    }
}

/// Response status codes.
///
/// Each response frame carries its own status; for streams every chunk is
/// interpreted independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Ok = 0,
    /// The requested song, album or file does not exist.
    NoMatch = 1,
    /// The method code is not recognized.
    BadMethod = 2,
    /// Access to the requested path is not allowed.
    Denied = 3,
    /// Unexpected fault while handling the request.
    Internal = 4,
    /// The transcoder exited unsuccessfully.
    TranscodeError = 5,
    /// The stream ended because it was canceled.
    Canceled = 6,
}

impl Status {
    const ALL: [Status; 7] = [
        Status::Ok,
        Status::NoMatch,
        Status::BadMethod,
        Status::Denied,
        Status::Internal,
        Status::TranscodeError,
        Status::Canceled,
    ];

    /// Returns the wire code.
    pub fn code(self) -> u32 {
        self as u32
    }

    /// Decodes a wire code, treating unknown codes as [`Status::Internal`].
    pub fn from_code(code: u32) -> Self {
        Status::try_from(code).unwrap_or(Status::Internal)
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }

    /// Maps the status onto the HTTP status presented to front clients.
    pub fn http_code(self) -> u16 {
        match self {
            Status::Ok | Status::Canceled => 200,
            Status::NoMatch => 404,
            Status::Denied => 403,
            Status::BadMethod | Status::Internal | Status::TranscodeError => 500,
        }
    }
}

impl TryFrom<u32> for Status {
    type Error = u32;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        Status::ALL.get(code as usize).copied().ok_or(code)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Ok => "OK",
            Status::NoMatch => "NO_MATCH",
            Status::BadMethod => "BAD_METHOD",
            Status::Denied => "DENIED",
            Status::Internal => "INTERNAL",
            Status::TranscodeError => "TRANSCODE_ERROR",
            Status::Canceled => "CANCELED",
        };
        f.write_str(name)
    }
}
