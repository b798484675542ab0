//! Minimal login and consent pages. Every interpolated value is escaped.

use std::fmt::Write;

use crate::oauth::consent::{ConsentPrompt, CONSENT_TOKEN_FIELD};

pub fn escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#x27;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

fn page(title: &str, body: &str) -> String {
    format!(
        "<!DOCTYPE html>\n<html>\n<head><meta charset=\"utf-8\"><title>{}</title></head>\n<body>\n{}</body>\n</html>\n",
        escape(title),
        body
    )
}

fn hidden(out: &mut String, name: &str, value: &str) {
    let _ = writeln!(
        out,
        "<input type=\"hidden\" name=\"{}\" value=\"{}\">",
        escape(name),
        escape(value)
    );
}

pub fn login_page(return_to: &str, failed: bool) -> String {
    let mut body = String::from("<h1>Sign in</h1>\n");
    if failed {
        body.push_str("<p class=\"error\">Invalid username or password</p>\n");
    }
    body.push_str("<form method=\"post\" action=\"/login\">\n");
    hidden(&mut body, "return_to", return_to);
    body.push_str(
        "<label>Username <input type=\"text\" name=\"login\" autofocus></label>\n\
         <label>Password <input type=\"password\" name=\"password\"></label>\n\
         <button type=\"submit\">Sign in</button>\n</form>\n",
    );
    page("Sign in", &body)
}

pub fn consent_page(prompt: &ConsentPrompt) -> String {
    let client = if prompt.client_name.is_empty() {
        &prompt.client_id
    } else {
        &prompt.client_name
    };

    let mut body = format!(
        "<h1>{} is requesting access to your account</h1>\n<form method=\"post\" action=\"/authorize\">\n",
        escape(client)
    );
    hidden(&mut body, "response_type", prompt.response_type.as_str());
    hidden(&mut body, "client_id", &prompt.client_id);
    hidden(&mut body, "redirect_uri", &prompt.redirect_uri);
    if let Some(state) = &prompt.state {
        hidden(&mut body, "state", state);
    }
    hidden(&mut body, "access_type", prompt.access_type.as_str());
    hidden(&mut body, "scope", &prompt.scope());
    hidden(&mut body, CONSENT_TOKEN_FIELD, &prompt.consent_token);

    body.push_str("<ul>\n");
    for choice in &prompt.choices {
        let _ = writeln!(
            body,
            "<li><label><input type=\"checkbox\" name=\"{0}\"{1}> {0}</label></li>",
            escape(&choice.scope),
            if choice.previously_granted { " checked" } else { "" }
        );
    }
    body.push_str(
        "</ul>\n<button type=\"submit\" name=\"authorize\" value=\"Authorize\">Authorize</button>\n\
         <button type=\"submit\" name=\"deny\" value=\"Deny\">Deny</button>\n</form>\n",
    );
    page("Authorize access", &body)
}
