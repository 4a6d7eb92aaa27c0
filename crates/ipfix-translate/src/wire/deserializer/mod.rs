// Copyright (C) 2023-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Deserializers for the IPFIX message, set and template structures.

use nom::{
    error::ErrorKind,
    number::complete::{be_u16, be_u32},
    IResult,
};

use crate::{
    ipfix::{MessageHeader, OptionsTemplateRecord, SetHeader, TemplateRecord, IPFIX_HEADER_LENGTH, IPFIX_VERSION},
    wire::{parse_into_located, LocatedParsingError, ReadablePdu, Span},
    FieldSpecifier,
};

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum MessageHeaderParsingError {
    NomError(ErrorKind),
    UnsupportedVersion(u16),
    InvalidLength(u16),
}

impl std::fmt::Display for MessageHeaderParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NomError(e) => write!(f, "{}", nom::Err::Error(e)),
            Self::UnsupportedVersion(version) => write!(f, "unsupported IPFIX version: {version}"),
            Self::InvalidLength(len) => write!(f, "invalid IPFIX message length: {len}"),
        }
    }
}

impl std::error::Error for MessageHeaderParsingError {}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocatedMessageHeaderParsingError<'a> {
    span: Span<'a>,
    error: MessageHeaderParsingError,
}

impl<'a> LocatedMessageHeaderParsingError<'a> {
    pub const fn new(span: Span<'a>, error: MessageHeaderParsingError) -> Self {
        Self { span, error }
    }
}

impl<'a> LocatedParsingError for LocatedMessageHeaderParsingError<'a> {
    type Span = Span<'a>;
    type Error = MessageHeaderParsingError;

    fn span(&self) -> &Self::Span {
        &self.span
    }

    fn error(&self) -> &Self::Error {
        &self.error
    }
}

impl<'a> nom::error::ParseError<Span<'a>> for LocatedMessageHeaderParsingError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self::new(input, MessageHeaderParsingError::NomError(kind))
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> ReadablePdu<'a, LocatedMessageHeaderParsingError<'a>> for MessageHeader {
    fn from_wire(
        buf: Span<'a>,
    ) -> IResult<Span<'a>, Self, LocatedMessageHeaderParsingError<'a>> {
        let input = buf;
        let (buf, version) = be_u16(buf)?;
        if version != IPFIX_VERSION {
            return Err(nom::Err::Error(LocatedMessageHeaderParsingError::new(
                input,
                MessageHeaderParsingError::UnsupportedVersion(version),
            )));
        }
        let input = buf;
        let (buf, length) = be_u16(buf)?;
        if length < IPFIX_HEADER_LENGTH {
            return Err(nom::Err::Error(LocatedMessageHeaderParsingError::new(
                input,
                MessageHeaderParsingError::InvalidLength(length),
            )));
        }
        let (buf, export_time) = be_u32(buf)?;
        let (buf, sequence_number) = be_u32(buf)?;
        let (buf, observation_domain_id) = be_u32(buf)?;
        Ok((
            buf,
            MessageHeader::new(length, export_time, sequence_number, observation_domain_id),
        ))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum SetParsingError {
    NomError(ErrorKind),
    /// A set length of zero makes locating the next set impossible; the
    /// whole datagram is rejected.
    ZeroLengthSet,
}

impl std::fmt::Display for SetParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NomError(e) => write!(f, "{}", nom::Err::Error(e)),
            Self::ZeroLengthSet => write!(f, "flowset zero length error"),
        }
    }
}

impl std::error::Error for SetParsingError {}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocatedSetParsingError<'a> {
    span: Span<'a>,
    error: SetParsingError,
}

impl<'a> LocatedSetParsingError<'a> {
    pub const fn new(span: Span<'a>, error: SetParsingError) -> Self {
        Self { span, error }
    }
}

impl<'a> LocatedParsingError for LocatedSetParsingError<'a> {
    type Span = Span<'a>;
    type Error = SetParsingError;

    fn span(&self) -> &Self::Span {
        &self.span
    }

    fn error(&self) -> &Self::Error {
        &self.error
    }
}

impl<'a> nom::error::ParseError<Span<'a>> for LocatedSetParsingError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self::new(input, SetParsingError::NomError(kind))
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> ReadablePdu<'a, LocatedSetParsingError<'a>> for SetHeader {
    fn from_wire(buf: Span<'a>) -> IResult<Span<'a>, Self, LocatedSetParsingError<'a>> {
        let input = buf;
        let (buf, id) = be_u16(buf)?;
        let (buf, length) = be_u16(buf)?;
        if length == 0 {
            return Err(nom::Err::Error(LocatedSetParsingError::new(
                input,
                SetParsingError::ZeroLengthSet,
            )));
        }
        Ok((buf, SetHeader::new(id, length)))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum FieldParsingError {
    NomError(ErrorKind),
}

impl std::fmt::Display for FieldParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NomError(e) => write!(f, "{}", nom::Err::Error(e)),
        }
    }
}

impl std::error::Error for FieldParsingError {}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocatedFieldParsingError<'a> {
    span: Span<'a>,
    error: FieldParsingError,
}

impl<'a> LocatedFieldParsingError<'a> {
    pub const fn new(span: Span<'a>, error: FieldParsingError) -> Self {
        Self { span, error }
    }
}

impl<'a> LocatedParsingError for LocatedFieldParsingError<'a> {
    type Span = Span<'a>;
    type Error = FieldParsingError;

    fn span(&self) -> &Self::Span {
        &self.span
    }

    fn error(&self) -> &Self::Error {
        &self.error
    }
}

impl<'a> nom::error::ParseError<Span<'a>> for LocatedFieldParsingError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self::new(input, FieldParsingError::NomError(kind))
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> ReadablePdu<'a, LocatedFieldParsingError<'a>> for FieldSpecifier {
    fn from_wire(buf: Span<'a>) -> IResult<Span<'a>, Self, LocatedFieldParsingError<'a>> {
        let (buf, code) = be_u16(buf)?;
        let is_enterprise = code & 0x8000 != 0;
        let (buf, length) = be_u16(buf)?;
        let (buf, enterprise_number) = if is_enterprise {
            be_u32(buf)?
        } else {
            (buf, 0)
        };
        Ok((
            buf,
            FieldSpecifier::new(code & 0x7fff, length, enterprise_number),
        ))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum TemplateRecordParsingError {
    NomError(ErrorKind),
    FieldError(FieldParsingError),
}

impl std::fmt::Display for TemplateRecordParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NomError(e) => write!(f, "{}", nom::Err::Error(e)),
            Self::FieldError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TemplateRecordParsingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::NomError(_) => None,
            Self::FieldError(e) => Some(e),
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocatedTemplateRecordParsingError<'a> {
    span: Span<'a>,
    error: TemplateRecordParsingError,
}

impl<'a> LocatedTemplateRecordParsingError<'a> {
    pub const fn new(span: Span<'a>, error: TemplateRecordParsingError) -> Self {
        Self { span, error }
    }
}

impl<'a> LocatedParsingError for LocatedTemplateRecordParsingError<'a> {
    type Span = Span<'a>;
    type Error = TemplateRecordParsingError;

    fn span(&self) -> &Self::Span {
        &self.span
    }

    fn error(&self) -> &Self::Error {
        &self.error
    }
}

impl<'a> nom::error::ParseError<Span<'a>> for LocatedTemplateRecordParsingError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self::new(input, TemplateRecordParsingError::NomError(kind))
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> From<LocatedFieldParsingError<'a>> for LocatedTemplateRecordParsingError<'a> {
    fn from(value: LocatedFieldParsingError<'a>) -> Self {
        let span = *value.span();
        Self::new(
            span,
            TemplateRecordParsingError::FieldError(value.error().clone()),
        )
    }
}

impl<'a> ReadablePdu<'a, LocatedTemplateRecordParsingError<'a>> for TemplateRecord {
    fn from_wire(
        buf: Span<'a>,
    ) -> IResult<Span<'a>, Self, LocatedTemplateRecordParsingError<'a>> {
        let (buf, template_id) = be_u16(buf)?;
        let (mut buf, field_count) = be_u16(buf)?;
        let mut fields = Vec::with_capacity(field_count as usize);
        for _ in 0..field_count {
            let (t, field) = parse_into_located(buf)?;
            fields.push(field);
            buf = t;
        }
        Ok((
            buf,
            TemplateRecord::new(template_id, fields.into_boxed_slice()),
        ))
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum OptionsTemplateRecordParsingError {
    NomError(ErrorKind),
    /// A scope field count of zero violates RFC 7011 section 3.4.2.2.
    ZeroScopeFieldCount,
    /// Scope field count must not exceed the total field count.
    InvalidScopeFieldsCount(u16),
    FieldError(FieldParsingError),
}

impl std::fmt::Display for OptionsTemplateRecordParsingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NomError(e) => write!(f, "{}", nom::Err::Error(e)),
            Self::ZeroScopeFieldCount => write!(f, "scope field count must not be zero"),
            Self::InvalidScopeFieldsCount(count) => write!(f, "invalid scope field count {count}"),
            Self::FieldError(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for OptionsTemplateRecordParsingError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::FieldError(e) => Some(e),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LocatedOptionsTemplateRecordParsingError<'a> {
    span: Span<'a>,
    error: OptionsTemplateRecordParsingError,
}

impl<'a> LocatedOptionsTemplateRecordParsingError<'a> {
    pub const fn new(span: Span<'a>, error: OptionsTemplateRecordParsingError) -> Self {
        Self { span, error }
    }
}

impl<'a> LocatedParsingError for LocatedOptionsTemplateRecordParsingError<'a> {
    type Span = Span<'a>;
    type Error = OptionsTemplateRecordParsingError;

    fn span(&self) -> &Self::Span {
        &self.span
    }

    fn error(&self) -> &Self::Error {
        &self.error
    }
}

impl<'a> nom::error::ParseError<Span<'a>> for LocatedOptionsTemplateRecordParsingError<'a> {
    fn from_error_kind(input: Span<'a>, kind: ErrorKind) -> Self {
        Self::new(input, OptionsTemplateRecordParsingError::NomError(kind))
    }

    fn append(_input: Span<'a>, _kind: ErrorKind, other: Self) -> Self {
        other
    }
}

impl<'a> From<LocatedFieldParsingError<'a>> for LocatedOptionsTemplateRecordParsingError<'a> {
    fn from(value: LocatedFieldParsingError<'a>) -> Self {
        let span = *value.span();
        Self::new(
            span,
            OptionsTemplateRecordParsingError::FieldError(value.error().clone()),
        )
    }
}

impl<'a> ReadablePdu<'a, LocatedOptionsTemplateRecordParsingError<'a>> for OptionsTemplateRecord {
    fn from_wire(
        buf: Span<'a>,
    ) -> IResult<Span<'a>, Self, LocatedOptionsTemplateRecordParsingError<'a>> {
        let (buf, template_id) = be_u16(buf)?;
        let (buf, field_count) = be_u16(buf)?;
        let input = buf;
        let (mut buf, scope_field_count) = be_u16(buf)?;
        if scope_field_count == 0 {
            return Err(nom::Err::Error(
                LocatedOptionsTemplateRecordParsingError::new(
                    input,
                    OptionsTemplateRecordParsingError::ZeroScopeFieldCount,
                ),
            ));
        }
        if scope_field_count > field_count {
            return Err(nom::Err::Error(
                LocatedOptionsTemplateRecordParsingError::new(
                    input,
                    OptionsTemplateRecordParsingError::InvalidScopeFieldsCount(scope_field_count),
                ),
            ));
        }
        let mut scope_fields = Vec::with_capacity(scope_field_count as usize);
        for _ in 0..scope_field_count {
            let (t, field) = parse_into_located(buf)?;
            scope_fields.push(field);
            buf = t;
        }
        let fields_count = field_count - scope_field_count;
        let mut fields = Vec::with_capacity(fields_count as usize);
        for _ in 0..fields_count {
            let (t, field) = parse_into_located(buf)?;
            fields.push(field);
            buf = t;
        }
        Ok((
            buf,
            OptionsTemplateRecord::new(
                template_id,
                scope_fields.into_boxed_slice(),
                fields.into_boxed_slice(),
            ),
        ))
    }
}
