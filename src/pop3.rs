use lazy_static::lazy_static;
use log::{debug, error, info, warn};
use regex::Regex;

use crate::codec::{self, ServerResponse};
use crate::credentials::Credentials;
use crate::error::{Error, Phase, Result};
use crate::message::MessageIdentifier;
use crate::output::MailSink;
use crate::persistence::OldMails;
use crate::shutdown::ShutdownSignal;
use crate::tcpstream::Transport;

lazy_static! {
    static ref STAT_RESPONSE: Regex =
        Regex::new(r"^\+OK\s+(?P<count>\d+)(\s|$)").unwrap();
}

/// Message count reported when `STAT` gives nothing usable.
const NOT_UPDATED: usize = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum POP3State {
    Disconnected,
    Connected,
    Authorizing,
    Transacting,
    Updating,
    Closed,
}

/// What a completed session did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Summary {
    /// Messages the server reported.
    pub total: usize,
    /// Messages written to the output.
    pub new: usize,
    /// Messages skipped because an earlier run downloaded them.
    pub old: usize,
    /// Messages marked for deletion.
    pub deleted: usize,
    /// Whether a shutdown request cut the session short.
    pub interrupted: bool,
}

/// One POP3 session, from connecting to `QUIT`.
///
/// The client owns the connection and the in-memory dedup store for the
/// whole run. Once closed, it cannot be used for another session.
pub struct POP3Client<S> {
    stream: Option<S>,
    state: POP3State,
    old_mails: OldMails,
    delete: bool,
    shutdown: ShutdownSignal,
}

impl<S: Transport> POP3Client<S> {
    pub fn new(
        old_mails: OldMails,
        delete: bool,
        shutdown: ShutdownSignal,
    ) -> Self {
        POP3Client {
            stream: None,
            state: POP3State::Disconnected,
            old_mails,
            delete,
            shutdown,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> POP3State {
        self.state
    }

    pub fn old_mails(&self) -> &OldMails {
        &self.old_mails
    }

    /// Attaches the stream produced by `open`, which must have consumed the
    /// server greeting.
    pub fn connect(
        &mut self,
        open: impl FnOnce() -> Result<S>,
    ) -> Result<()> {
        if POP3State::Disconnected != self.state {
            return Err(Error::SessionClosed);
        }

        match open() {
            Ok(stream) => {
                self.stream = Some(stream);
                self.state = POP3State::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = POP3State::Closed;
                Err(e)
            }
        }
    }

    /// Runs the whole session: authenticate, download every message not
    /// downloaded before, commit the dedup store, then `QUIT`.
    ///
    /// Failures after authentication still commit whatever was recorded and
    /// attempt `QUIT` before being returned.
    pub fn fetch_emails(
        &mut self,
        credentials: &Credentials,
        sink: &mut dyn MailSink,
    ) -> Result<Summary> {
        if POP3State::Connected != self.state {
            return Err(Error::SessionClosed);
        }

        info!("Logging in with USER/PASS...");
        if let Err(e) =
            self.authorize(&credentials.username, &credentials.password)
        {
            self.close();
            return Err(e);
        }
        info!("Logged in successfully");

        let mut summary = Summary::default();
        let transaction = self.transact(sink, &mut summary);
        if let Err(ref e) = transaction {
            error!("Stopped processing messages: {}", e);
        }

        if let Err(e) = self.old_mails.flush() {
            error!(
                "Could not store downloaded message ids to {}: {}",
                self.old_mails.path().display(),
                e
            );
        }

        let quit = self.quit();
        self.close();

        transaction?;
        quit?;
        Ok(summary)
    }

    pub fn authorize(&mut self, username: &str, password: &str) -> Result<()> {
        self.state = POP3State::Authorizing;

        let response = self.send_command(
            Phase::Authenticate,
            "USER",
            Some(username),
            false,
        )?;
        if !response.is_ok() {
            return Err(Error::Auth(response.status_line().to_owned()));
        }

        let response = self.send_command(
            Phase::Authenticate,
            "PASS",
            Some(password),
            false,
        )?;
        if !response.is_ok() {
            return Err(Error::Auth(response.status_line().to_owned()));
        }

        self.state = POP3State::Transacting;
        Ok(())
    }

    pub fn count_messages(&mut self) -> Result<usize> {
        let response =
            self.send_command(Phase::Enumerate, "STAT", None, false)?;
        if !response.is_ok() {
            return Err(Error::protocol(
                Phase::Enumerate,
                response.status_line(),
            ));
        }

        match STAT_RESPONSE
            .captures(response.status_line())
            .and_then(|cap| cap["count"].parse::<usize>().ok())
        {
            Some(count) => Ok(count),
            None => {
                warn!(
                    "Unparsable STAT response {:?}, assuming no messages",
                    response.status_line()
                );
                Ok(NOT_UPDATED)
            }
        }
    }

    pub fn fetch_message(&mut self, mail_number: usize) -> Result<Vec<u8>> {
        let response = self.send_command(
            Phase::Fetch,
            "RETR",
            Some(&mail_number.to_string()),
            true,
        )?;
        if !response.is_ok() {
            return Err(Error::protocol(
                Phase::Fetch,
                format!("message {}: {}", mail_number, response.status_line()),
            ));
        }
        Ok(response.into_body())
    }

    /// Marks a message for deletion. The server only removes it once the
    /// session ends with a successful `QUIT`.
    pub fn delete_message(&mut self, mail_number: usize) -> Result<()> {
        let response = self.send_command(
            Phase::Delete,
            "DELE",
            Some(&mail_number.to_string()),
            false,
        )?;
        if !response.is_ok() {
            return Err(Error::protocol(
                Phase::Delete,
                format!("message {}: {}", mail_number, response.status_line()),
            ));
        }
        Ok(())
    }

    pub fn quit(&mut self) -> Result<()> {
        self.state = POP3State::Updating;
        let response =
            self.send_command(Phase::Terminate, "QUIT", None, false)?;
        if !response.is_ok() {
            return Err(Error::protocol(
                Phase::Terminate,
                format!(
                    "{} (deletions were not applied)",
                    response.status_line()
                ),
            ));
        }
        Ok(())
    }

    /// Drops the connection. The session is over after this.
    pub fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            debug!("Closing connection");
            stream.close();
        }
        self.state = POP3State::Closed;
    }

    fn transact(
        &mut self,
        sink: &mut dyn MailSink,
        summary: &mut Summary,
    ) -> Result<()> {
        let total = self.count_messages()?;
        summary.total = total;
        info!("There are {} mails available", total);

        for mail_number in 1..=total {
            // Only between messages: a message is either fully processed
            // or not touched at all.
            if self.shutdown.requested() {
                warn!(
                    "Shutdown requested, skipping the remaining {} messages",
                    total - mail_number + 1
                );
                summary.interrupted = true;
                break;
            }

            let raw = self.fetch_message(mail_number)?;
            let id = MessageIdentifier::extract(&raw);
            if self.old_mails.contains(&id) {
                debug!("Message {} ({}) is old, skipping", mail_number, id);
                summary.old += 1;
            } else {
                sink.store(&id, &raw)?;
                info!("Downloaded message {} ({})", mail_number, id);
                self.old_mails.record(id);
                summary.new += 1;
            }

            if self.delete {
                match self.delete_message(mail_number) {
                    Ok(()) => {
                        debug!("Marked message {} for deletion", mail_number);
                        summary.deleted += 1;
                    }
                    Err(e @ Error::Protocol { .. }) => warn!("{}", e),
                    Err(e) => return Err(e),
                }
            }
        }

        Ok(())
    }

    fn send_command(
        &mut self,
        phase: Phase,
        command: &str,
        param: Option<&str>,
        is_multiline: bool,
    ) -> Result<ServerResponse> {
        let stream = self.stream.as_mut().ok_or(Error::SessionClosed)?;
        codec::send_command(stream, command, param)
            .map_err(|e| Error::io(phase, e))?;
        codec::read_response(stream, is_multiline)
            .map_err(|e| Error::io(phase, e))
    }
}
