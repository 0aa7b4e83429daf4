// SPDX-FileCopyrightText: OpenTalk GmbH <mail@opentalk.eu>
//
// SPDX-License-Identifier: EUPL-1.2

/// Reason of a failed transcoder start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupFailure {
    InvalidArgument,
    MissingInput,
    ParseError,
    UnknownOption,
    ConnectionRefused,
    ProtocolNotFound,
    InvalidData,
    AddressInUse,
}

impl StartupFailure {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidArgument => "invalid argument",
            Self::MissingInput => "missing input",
            Self::ParseError => "parse error",
            Self::UnknownOption => "unknown option",
            Self::ConnectionRefused => "connection refused",
            Self::ProtocolNotFound => "protocol not found",
            Self::InvalidData => "invalid data",
            Self::AddressInUse => "address in use",
        }
    }
}

impl std::fmt::Display for StartupFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Meaning of a transcoder diagnostic line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signature {
    /// The transcoder opened its inputs and outputs
    Opened,
    /// The transcoder is going to fail
    Fatal(StartupFailure),
}

/// Line fragments which make a start fail, checked before [`OPENED_SIGNATURES`]
const FATAL_SIGNATURES: &[(&str, StartupFailure)] = &[
    ("Invalid argument", StartupFailure::InvalidArgument),
    ("No such file", StartupFailure::MissingInput),
    ("Error parsing", StartupFailure::ParseError),
    ("No option name", StartupFailure::UnknownOption),
    ("Unrecognized option", StartupFailure::UnknownOption),
    ("Connection refused", StartupFailure::ConnectionRefused),
    ("Protocol not found", StartupFailure::ProtocolNotFound),
    ("Invalid data found", StartupFailure::InvalidData),
    (
        "bind failed: Address already in use",
        StartupFailure::AddressInUse,
    ),
];

/// Line fragments the transcoder prints once it runs
const OPENED_SIGNATURES: &[&str] = &[
    "Opening",
    "Stream mapping",
    "Output #0",
    "muxer does not support non seekable output",
];

/// Classify one line of the transcoder's diagnostic output.
#[must_use]
pub fn classify(line: &str) -> Option<Signature> {
    if let Some((_, failure)) = FATAL_SIGNATURES
        .iter()
        .find(|(fragment, _)| line.contains(fragment))
    {
        return Some(Signature::Fatal(*failure));
    }
    OPENED_SIGNATURES
        .iter()
        .any(|fragment| line.contains(fragment))
        .then_some(Signature::Opened)
}
