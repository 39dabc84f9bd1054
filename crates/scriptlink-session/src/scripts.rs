use scriptlink_core::{CursorConfig, HookConfig, SnapshotConfig};

const HOOK_INSTALL: &str = r#"(function() {
    var result = { installed: false, message: '', hookedEvents: 0 };
    try {
        var state = window.__scriptlinkHook;
        if (state && state.installed) {
            result.installed = true;
            result.hookedEvents = state.hookedEvents;
            result.message = 'already installed';
            return JSON.stringify(result);
        }
        var target = __TARGET__;
        if (!target) {
            result.message = 'hook target not available';
            return JSON.stringify(result);
        }
        state = window.__scriptlinkHook = { installed: false, buffer: [], hookedEvents: 0 };
        var cap = __CAP__;
        var record = function(msg) {
            if (!msg) return;
            state.buffer.push({
                time: msg.time || Date.now(),
                scene: msg.scene || '',
                from: msg.from || '',
                to: msg.to || '',
                type: msg.type || '',
                text: msg.text || '',
                fromNick: (msg.user && (msg.user.groupMemberNick || msg.user.userNick))
                    || msg.fromNick || '',
                flow: msg.flow || '',
                idClient: msg.idClient || '',
                content: msg.content
                    ? (typeof msg.content === 'string' ? msg.content : JSON.stringify(msg.content))
                    : ''
            });
            if (state.buffer.length > cap) {
                state.buffer.splice(0, state.buffer.length - cap);
            }
        };
        __CALLBACKS__.forEach(function(name) {
            var original = target[name];
            target[name] = function(payload) {
                try {
                    if (Array.isArray(payload)) {
                        payload.forEach(record);
                    } else {
                        record(payload);
                    }
                } catch (e) {}
                if (typeof original === 'function') {
                    return original.apply(this, arguments);
                }
            };
            state.hookedEvents++;
        });
        state.installed = true;
        result.installed = true;
        result.hookedEvents = state.hookedEvents;
    } catch (e) {
        result.message = e.message;
    }
    return JSON.stringify(result);
})()"#;

const HOOK_DRAIN: &str = r#"(function() {
    var state = window.__scriptlinkHook;
    if (!state || !state.installed) return JSON.stringify(null);
    var drained = state.buffer;
    state.buffer = [];
    return JSON.stringify(drained);
})()"#;

const CURSOR_DISCOVER: &str = r#"(function() {
    return new Promise(function(resolve) {
        if (!indexedDB.databases) {
            resolve(JSON.stringify({ success: false, error: 'indexedDB.databases not available' }));
            return;
        }
        indexedDB.databases().then(function(dbs) {
            var found = dbs.find(function(db) {
                return db.name && db.name.indexOf(__PREFIX__) === 0;
            });
            if (found) {
                window.__scriptlinkDbName = found.name;
                resolve(JSON.stringify({ success: true, dbName: found.name }));
            } else {
                resolve(JSON.stringify({ success: false, error: 'database not found' }));
            }
        }).catch(function(e) {
            resolve(JSON.stringify({ success: false, error: e.message }));
        });
    });
})()"#;

const CURSOR_SCAN: &str = r#"(function() {
    return new Promise(function(resolve) {
        var bound = __BOUND__;
        var limit = __PAGE__;
        var result = { rows: [], maxPosition: bound, error: null };
        var rowText = function(msg) {
            var text = msg.text || '';
            var content = msg.content;
            try {
                if (typeof content === 'string') content = JSON.parse(content);
            } catch (e) {
                content = null;
            }
            if (content && content.b) {
                try {
                    var b64 = content.b.replace(/-/g, '+').replace(/_/g, '/');
                    while (b64.length % 4) b64 += '=';
                    var raw = atob(b64);
                    var bytes = new Uint8Array(raw.length);
                    for (var i = 0; i < raw.length; i++) bytes[i] = raw.charCodeAt(i);
                    var decoded = new TextDecoder('utf-8', { fatal: false }).decode(bytes);
                    var runs = decoded.match(/[\u4e00-\u9fff]+/g);
                    if (runs) text = runs.join(' ');
                } catch (e) {}
            }
            return text.substring(0, 500);
        };
        if (!window.__scriptlinkDbName) {
            result.error = 'database not initialized';
            resolve(JSON.stringify(result));
            return;
        }
        var request = indexedDB.open(window.__scriptlinkDbName);
        request.onerror = function() {
            result.error = 'open failed';
            resolve(JSON.stringify(result));
        };
        request.onsuccess = function(event) {
            var db = event.target.result;
            try {
                var store = db.transaction(__STORE__, 'readonly').objectStore(__STORE__);
                var index = store.index(__INDEX__);
                var range = bound > 0 ? IDBKeyRange.lowerBound(bound, true) : null;
                var cursor = index.openCursor(range, 'next');
                cursor.onsuccess = function(e) {
                    var c = e.target.result;
                    if (!c) {
                        db.close();
                        resolve(JSON.stringify(result));
                        return;
                    }
                    var msg = c.value;
                    var position = c.key;
                    result.maxPosition = position;
                    result.rows.push({
                        position: position,
                        time: msg.time,
                        scene: msg.scene || '',
                        from: msg.from || '',
                        to: msg.to || msg.target || '',
                        type: msg.type || '',
                        text: rowText(msg),
                        fromNick: msg.fromNick || '',
                        flow: msg.flow || '',
                        idClient: msg.idClient || '',
                        content: typeof msg.content === 'string'
                            ? msg.content
                            : (msg.content ? JSON.stringify(msg.content) : '')
                    });
                    if (result.rows.length >= limit) {
                        db.close();
                        resolve(JSON.stringify(result));
                        return;
                    }
                    c.continue();
                };
                cursor.onerror = function() {
                    result.error = 'cursor failed';
                    db.close();
                    resolve(JSON.stringify(result));
                };
            } catch (e) {
                result.error = e.message;
                db.close();
                resolve(JSON.stringify(result));
            }
        };
    });
})()"#;

const SNAPSHOT: &str = r#"(function() {
    var nodes = document.querySelectorAll(__SELECTOR__);
    var limit = __LIMIT__;
    var start = Math.max(0, nodes.length - limit);
    var entries = [];
    for (var i = start; i < nodes.length; i++) {
        var node = nodes[i];
        var cls = (node.className && node.className.toString()) || '';
        var senderNode = node.querySelector('[class*="nick"], [class*="name"]');
        var textNode = node.querySelector('[class*="text"], [class*="content"]') || node;
        entries.push({
            index: i,
            sender: senderNode ? senderNode.innerText.trim() : '',
            senderId: node.getAttribute('data-from') || node.getAttribute('data-id') || '',
            text: (textNode.innerText || '').trim(),
            isSelf: /self|mine|right/i.test(cls)
        });
    }
    return JSON.stringify(entries);
})()"#;

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

pub fn hook_install(config: &HookConfig) -> String {
    let callbacks = serde_json::to_string(&config.callbacks).unwrap_or_else(|_| "[]".to_string());
    HOOK_INSTALL
        .replace("__TARGET__", &config.target_object)
        .replace("__CAP__", &config.buffer_cap.max(1).to_string())
        .replace("__CALLBACKS__", &callbacks)
}

pub fn hook_drain() -> String {
    HOOK_DRAIN.to_string()
}

pub fn cursor_discover(config: &CursorConfig) -> String {
    CURSOR_DISCOVER.replace("__PREFIX__", &js_string(&config.database_prefix))
}

// Scan of at most `page_limit` rows strictly above `bound`, in position order.
pub fn cursor_scan(config: &CursorConfig, bound: i64) -> String {
    CURSOR_SCAN
        .replace("__BOUND__", &bound.to_string())
        .replace("__PAGE__", &config.page_limit.max(1).to_string())
        .replace("__STORE__", &js_string(&config.store))
        .replace("__INDEX__", &js_string(&config.index))
}

pub fn snapshot(config: &SnapshotConfig) -> String {
    SNAPSHOT
        .replace("__SELECTOR__", &js_string(&config.selector))
        .replace("__LIMIT__", &config.limit.max(1).to_string())
}
