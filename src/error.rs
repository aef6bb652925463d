// Copyright 2019 Zhizhesihai (Beijing) Technology Limited.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// See the License for the specific language governing permissions and
// limitations under the License.

use crate::core::index;
use crate::core::search;
use crate::core::search::collector;

use std::borrow::Cow;
use std::sync::PoisonError;

error_chain! {
    types {
        Error, ErrorKind, ResultExt, Result;
    }
    errors {
        Poisoned {
            description("a thread holding the locked panicked and poisoned the lock")
        }

        IllegalState(desc: String) {
            description(desc)
            display("Illegal state: {}", desc)
        }

        IllegalArgument(desc: String) {
            description(desc)
            display("Illegal argument: {}", desc)
        }

        UnexpectedEOF(errmsg: String) {
            description(errmsg)
            display("Unexpected EOF: {}", errmsg)
        }

        CorruptIndex(errmsg: String) {
            description(errmsg)
            display("Corrupt Index: {}", errmsg)
        }

        IndexFormatTooOld(resource: String, version: i32, min_version: i32, max_version: i32) {
            description("index format too old")
            display(
                "Format version is not supported (resource {}): {} (needs to be between {} and {}). \
                 This version of the index is too old",
                resource, version, min_version, max_version
            )
        }

        IndexFormatTooNew(resource: String, version: i32, min_version: i32, max_version: i32) {
            description("index format too new")
            display(
                "Format version is not supported (resource {}): {} (needs to be between {} and {})",
                resource, version, min_version, max_version
            )
        }

        LockObtainFailed(errmsg: String) {
            description(errmsg)
            display("Lock obtain failed: {}", errmsg)
        }

        LockReleaseFailed(errmsg: String) {
            description(errmsg)
            display("Lock release failed: {}", errmsg)
        }

        AlreadyClosed(errmsg: String) {
            description(errmsg)
            display("Already closed: {}", errmsg)
        }

        ThreadInterrupted(errmsg: String) {
            description(errmsg)
            display("Thread interrupted: {}", errmsg)
        }

        MergeException(errmsg: String, dir: String) {
            description(errmsg)
            display("Merge failed in directory {}: {}", dir, errmsg)
        }

        IndexNotFound(errmsg: String) {
            description(errmsg)
            display("Index not found: {}", errmsg)
        }

        NoSuchDirectory(errmsg: String) {
            description(errmsg)
            display("No such directory: {}", errmsg)
        }

        UnsupportedOperation(errmsg: Cow<'static, str>) {
            description(errmsg),
            display("Unsupported Operation: {}", errmsg)
        }

        RuntimeError(errmsg: String) {
            description(errmsg)
            display("Runtime Error: {}", errmsg)
        }
    }

    foreign_links {
        FmtError(::std::fmt::Error);
        IoError(::std::io::Error);
        FromUtf8Err(::std::string::FromUtf8Error);
        Utf8Error(::std::str::Utf8Error);
        NumError(::std::num::ParseIntError);
        ParseFloatError(::std::num::ParseFloatError);
        SerdeJsonError(::serde_json::Error);
    }

    links {
        Index(index::Error, index::ErrorKind);
        Collector(collector::Error, collector::ErrorKind);
        Search(search::Error, search::ErrorKind);
    }
}

impl<Guard> From<PoisonError<Guard>> for Error {
    fn from(_: PoisonError<Guard>) -> Error {
        ErrorKind::Poisoned.into()
    }
}
